//! End-to-end pipeline tests with all upstream APIs served by wiremock.

use chrono::Utc;
use repopulse_lib::collect::orchestrator::CollectOptions;
use repopulse_lib::collect::snapshot::ActivitySnapshot;
use repopulse_lib::collect::sources::SourceKind;
use repopulse_lib::collect::{PipelineConfig, PipelineContext, RepoKey};
use repopulse_lib::metrics::DerivedMetrics;
use repopulse_lib::store::{self, MemoryStore, StateStore, keys};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn repo() -> RepoKey {
    RepoKey::parse("acme/widgets").unwrap()
}

/// Wire a pipeline whose every upstream points at the mock server.
fn pipeline(server: &MockServer) -> (PipelineContext, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig {
        hosting_base_url: server.uri(),
        registry_base_url: server.uri(),
        cdn_base_url: server.uri(),
        scorecard_base_url: server.uri(),
        courtesy_delay: core::time::Duration::ZERO,
        pacing: core::time::Duration::ZERO,
        ..PipelineConfig::default()
    };

    let context = PipelineContext::with_live_sources(store.clone(), &["t0ken".to_string()], &config).unwrap();
    (context, store)
}

/// Mount success responses for the five hosting endpoints.
async fn mount_hosting(server: &MockServer) {
    let now = Utc::now();

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "stargazers_count": 42,
            "forks_count": 7,
            "archived": false,
            "pushed_at": now
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/pulls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "number": 1,
            "title": "add frobnicator",
            "user": {"login": "alice"},
            "created_at": now - chrono::Duration::days(5),
            "merged_at": now - chrono::Duration::days(4),
            "closed_at": now - chrono::Duration::days(4)
        }])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "number": 2,
            "title": "frobnicator is broken",
            "user": {"login": "bob"},
            "created_at": now - chrono::Duration::days(10),
            "closed_at": now - chrono::Duration::days(8)
        }])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "sha": "abc123",
                "commit": {
                    "message": "fix the frobnicator",
                    "author": {"name": "alice", "date": now - chrono::Duration::days(4)}
                }
            },
            {
                "sha": "def456",
                "commit": {
                    "message": "tidy docs",
                    "author": {"name": "bob", "date": now - chrono::Duration::days(2)}
                }
            }
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "id": 900,
            "tag_name": "v1.2.0",
            "name": "v1.2.0",
            "published_at": now - chrono::Duration::days(3)
        }])))
        .mount(server)
        .await;
}

/// Mount success responses for the registry, CDN, and scorecard endpoints.
async fn mount_scalar_feeds(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/downloads/point/last-month/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "downloads": 54321,
            "package": "widgets"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/stats/packages/npm/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "hits": {"total": 1000},
            "bandwidth": {"total": 5000000}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/projects/github.com/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "score": 7.5,
            "date": "2026-01-01",
            "checks": [{"name": "Maintained", "score": 10.0}]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn baseline_collection_builds_snapshot_and_metrics() {
    let server = MockServer::start().await;
    mount_hosting(&server).await;
    mount_scalar_feeds(&server).await;

    let (context, store) = pipeline(&server);
    let outcome = context.orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

    assert!(outcome.is_complete, "failed sources: {:?}", outcome.failed);
    assert_eq!(outcome.succeeded.len(), SourceKind::COUNT);

    let snapshot: ActivitySnapshot = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap().unwrap();
    assert_eq!(snapshot.counts.pull_requests, 1);
    assert_eq!(snapshot.counts.issues, 1);
    assert_eq!(snapshot.counts.commits, 2);
    assert_eq!(snapshot.counts.releases, 1);
    assert_eq!(snapshot.stats.stars, 42);
    assert_eq!(snapshot.registry.as_ref().unwrap().downloads_last_month, 54321);
    assert_eq!(snapshot.cdn.as_ref().unwrap().hits_last_month, 1000);
    assert!((snapshot.scorecard.as_ref().unwrap().score - 7.5).abs() < f64::EPSILON);

    let metrics: DerivedMetrics = store::get_json(store.as_ref(), &keys::metrics(&repo())).unwrap().unwrap();
    assert_eq!(metrics.commit_count, 2);
    assert_eq!(metrics.prs_merged, 1);
    assert_eq!(metrics.downloads_last_month, 54321);
    assert!(metrics.activity_score > 0.0);

    // A complete repository sits in neither maintenance index.
    assert_eq!(store.zcard(keys::RETRY_INDEX).unwrap(), 0);
    assert_eq!(store.zcard(keys::FAILURE_INDEX).unwrap(), 0);
}

#[tokio::test]
async fn scorecard_outage_is_partial_then_recovers() {
    let server = MockServer::start().await;
    mount_hosting(&server).await;

    Mock::given(method("GET"))
        .and(path("/downloads/point/last-month/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"downloads": 100})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/stats/packages/npm/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "hits": {"total": 10},
            "bandwidth": {"total": 10}
        })))
        .mount(&server)
        .await;

    // First call fails, later calls succeed.
    Mock::given(method("GET"))
        .and(path("/projects/github.com/acme/widgets"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/github.com/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"score": 9.9})))
        .mount(&server)
        .await;

    let (context, store) = pipeline(&server);

    let outcome = context.orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();
    assert!(outcome.is_partial);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, SourceKind::Scorecard);

    // The seven successful sources were persisted despite the failure.
    let snapshot: ActivitySnapshot = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap().unwrap();
    assert_eq!(snapshot.counts.commits, 2);
    assert!(snapshot.scorecard.is_none());
    assert_eq!(store.zcard(keys::RETRY_INDEX).unwrap(), 1);

    // Skip the backoff wait and run again; only the failed source is retried.
    assert_eq!(context.tracker.reset_failed(&repo()).unwrap(), 1);
    let outcome = context.orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

    assert_eq!(outcome.attempted, vec![SourceKind::Scorecard]);
    assert!(outcome.is_complete);

    let snapshot: ActivitySnapshot = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap().unwrap();
    assert!((snapshot.scorecard.as_ref().unwrap().score - 9.9).abs() < f64::EPSILON);
    assert_eq!(snapshot.counts.commits, 2);
    assert_eq!(store.zcard(keys::RETRY_INDEX).unwrap(), 0);
}

#[tokio::test]
async fn webhook_event_tops_up_a_collected_snapshot() {
    let server = MockServer::start().await;
    mount_hosting(&server).await;
    mount_scalar_feeds(&server).await;

    let (context, store) = pipeline(&server);
    let outcome = context.orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();
    assert!(outcome.is_complete);

    let event = serde_json::json!({
        "id": "delivery-1",
        "repo": "acme/widgets",
        "received_at": Utc::now(),
        "kind": "push",
        "commits": [{
            "sha": "fresh1",
            "message": "hot new commit",
            "author": "carol",
            "committed_at": Utc::now()
        }]
    })
    .to_string();

    assert!(context.webhooks.enqueue(&event).unwrap());
    let stats = context.webhooks.drain(10).unwrap();
    assert_eq!(stats.applied, 1);

    let snapshot: ActivitySnapshot = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap().unwrap();
    assert_eq!(snapshot.counts.commits, 3);

    // Metrics were recomputed to include the pushed commit.
    let metrics: DerivedMetrics = store::get_json(store.as_ref(), &keys::metrics(&repo())).unwrap().unwrap();
    assert_eq!(metrics.commit_count, 3);

    // Redelivery of the same event id is a no-op.
    assert!(!context.webhooks.enqueue(&event).unwrap());
    let snapshot: ActivitySnapshot = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap().unwrap();
    assert_eq!(snapshot.counts.commits, 3);
}
