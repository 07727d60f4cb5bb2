//! Drives one collection pass for a repository.
//!
//! A pass decides which sources are due, fetches the independent sources
//! concurrently and the hosting activity feeds sequentially, then settles
//! every outcome individually: each success is merged into the snapshot and
//! marked complete, each failure is recorded for backoff retry. One bad
//! source never discards the others' results.

use super::RepoKey;
use super::snapshot::{self, ActivityDelta, ActivitySnapshot, ScalarUpdate};
use super::sources::{SourceCollector, SourceData, SourceKind};
use super::state::StateTracker;
use crate::metrics::DerivedMetrics;
use crate::store::{self, StateStore, keys};
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = "   collect";

/// How a collection pass runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    /// Re-fetch every source over the full lookback, ignoring per-source
    /// status and backoff. The cached snapshot is still the merge base, so
    /// prior data and the eligibility block survive.
    pub force: bool,
}

/// What one collection pass did.
#[derive(Debug)]
pub struct CollectionOutcome {
    pub repo: RepoKey,
    pub attempted: Vec<SourceKind>,
    pub succeeded: Vec<SourceKind>,
    pub failed: Vec<(SourceKind, String)>,
    pub is_complete: bool,
    pub is_partial: bool,
    pub snapshot_updated: bool,
}

impl CollectionOutcome {
    /// A pass counts as successful when the repository ends up complete or
    /// partial. It fails only when no source has ever completed: partial data
    /// is persisted and usable, and the failed sources reschedule themselves.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.is_complete || self.is_partial
    }
}

/// Pass-level tuning for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Rolling window for derived metrics.
    pub window_days: i64,

    /// How much item history the snapshot retains.
    pub retention: chrono::Duration,

    /// Pause between sequential hosting feed fetches.
    pub courtesy_delay: core::time::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            window_days: 365,
            retention: chrono::Duration::days(365 * 3),
            courtesy_delay: core::time::Duration::from_secs(2),
        }
    }
}

/// Runs collection passes against a set of source collectors.
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    tracker: StateTracker,
    collectors: BTreeMap<SourceKind, Arc<dyn SourceCollector>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        tracker: StateTracker,
        collectors: Vec<Arc<dyn SourceCollector>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            collectors: collectors.into_iter().map(|c| (c.kind(), c)).collect(),
            config,
        }
    }

    /// Run one collection pass.
    ///
    /// Picking up a partially-collected repository is the default behavior:
    /// sources already completed are skipped and failed sources wait out
    /// their backoff unless `force` is set.
    pub async fn run(&self, repo: &RepoKey, options: CollectOptions) -> crate::Result<CollectionOutcome> {
        let now = Utc::now();
        let state = self.tracker.begin_pass(repo, now)?;

        let attempted: Vec<SourceKind> = if options.force {
            SourceKind::all().collect()
        } else {
            self.tracker.sources_needing_collection(&state, now)
        };

        let cached: Option<ActivitySnapshot> = store::get_json(self.store.as_ref(), &keys::snapshot(repo))?;

        // Incremental only when a baseline exists and this isn't a forced
        // re-collection.
        let since = if options.force { None } else { cached.as_ref().map(|s| s.last_updated_at) };

        log::info!(
            target: LOG_TARGET,
            "Pass #{} for {repo}: {} source(s) due, {}",
            state.attempt_count,
            attempted.len(),
            since.map_or_else(|| "baseline".to_string(), |s| format!("incremental since {s}")),
        );

        for &kind in &attempted {
            self.tracker.mark_in_progress(repo, kind, now)?;
        }

        let mut results: Vec<(SourceKind, Result<SourceData, super::sources::FetchError>)> = Vec::new();

        // Independent sources go out concurrently.
        let independent: Vec<SourceKind> = attempted.iter().copied().filter(|k| k.is_independent()).collect();
        results.extend(
            join_all(independent.iter().map(|&kind| async move {
                let result = self.fetch(kind, repo, since).await;
                (kind, result)
            }))
            .await,
        );

        // The hosting activity feeds share one quota; fetch them one at a
        // time with a courtesy pause in between.
        let sequential: Vec<SourceKind> = attempted.iter().copied().filter(|k| !k.is_independent()).collect();
        for (i, &kind) in sequential.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.courtesy_delay).await;
            }
            let result = self.fetch(kind, repo, since).await;
            results.push((kind, result));
        }

        // Settle every outcome individually.
        let settled_at = Utc::now();
        let mut delta = ActivityDelta::new(since, settled_at);
        let mut scalars = ScalarUpdate::default();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for (kind, result) in results {
            match result {
                Ok(data) => {
                    self.tracker.mark_completed(repo, kind, data.item_count(), settled_at)?;
                    data.accumulate(&mut delta, &mut scalars);
                    succeeded.push(kind);
                }
                Err(e) => {
                    let message = e.message();
                    log::warn!(target: LOG_TARGET, "{repo}/{kind} failed: {message}");
                    let _ = self.tracker.mark_failed(repo, kind, &message, settled_at)?;
                    failed.push((kind, message));
                }
            }
        }

        // Persist only when something succeeded, so a fully failed baseline
        // pass doesn't leave an empty snapshot behind.
        let snapshot_updated = !succeeded.is_empty();
        if snapshot_updated {
            let base = cached.unwrap_or_else(|| ActivitySnapshot::new(repo.clone(), settled_at));
            let merged = snapshot::merge(&base, &delta, &scalars);
            let pruned = snapshot::prune(&merged, self.config.retention, settled_at);
            store::set_json(self.store.as_ref(), &keys::snapshot(repo), &pruned)?;

            let metrics = DerivedMetrics::compute(&pruned, self.config.window_days, settled_at);
            store::set_json(self.store.as_ref(), &keys::metrics(repo), &metrics)?;

            log::debug!(
                target: LOG_TARGET,
                "Snapshot for {repo}: {} item(s), activity score {:.1}",
                pruned.counts.total(),
                metrics.activity_score,
            );
        }

        let state = self.tracker.initialize(repo, settled_at)?;
        Ok(CollectionOutcome {
            repo: repo.clone(),
            attempted,
            succeeded,
            failed,
            is_complete: state.is_complete(),
            is_partial: state.is_partial(),
            snapshot_updated,
        })
    }

    async fn fetch(
        &self,
        kind: SourceKind,
        repo: &RepoKey,
        since: Option<chrono::DateTime<Utc>>,
    ) -> Result<SourceData, super::sources::FetchError> {
        let Some(collector) = self.collectors.get(&kind) else {
            return Err(super::sources::FetchError::Transient(ohno::app_err!(
                "no collector configured for source '{kind}'"
            )));
        };

        match since {
            Some(since) => collector.fetch_since(repo, since).await,
            None => collector.fetch_all(repo).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::snapshot::{BasicStats, CommitItem, RegistryStats};
    use crate::collect::sources::FetchError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeCollector {
        kind: SourceKind,
        fail: bool,
        calls: AtomicUsize,
        last_since: Mutex<Option<DateTime<Utc>>>,
    }

    impl FakeCollector {
        fn ok(kind: SourceKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail: false,
                calls: AtomicUsize::new(0),
                last_since: Mutex::new(None),
            })
        }

        fn failing(kind: SourceKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail: true,
                calls: AtomicUsize::new(0),
                last_since: Mutex::new(None),
            })
        }

        fn payload(&self) -> SourceData {
            match self.kind {
                SourceKind::BasicStats => SourceData::BasicStats(BasicStats {
                    stars: 5,
                    forks: 1,
                    archived: false,
                    last_commit_at: Some(Utc::now()),
                }),
                SourceKind::Commits => SourceData::Commits(vec![CommitItem {
                    sha: "abc".to_string(),
                    message: "change".to_string(),
                    author: Some("alice".to_string()),
                    committed_at: Utc::now(),
                }]),
                SourceKind::Registry => SourceData::Registry(RegistryStats {
                    package: "widgets".to_string(),
                    downloads_last_month: 100,
                }),
                SourceKind::PullRequests => SourceData::PullRequests(Vec::new()),
                SourceKind::Issues => SourceData::Issues(Vec::new()),
                SourceKind::Releases => SourceData::Releases(Vec::new()),
                SourceKind::Cdn => SourceData::Cdn(crate::collect::snapshot::CdnStats {
                    package: "widgets".to_string(),
                    hits_last_month: 1,
                    bandwidth_last_month: 1,
                }),
                SourceKind::Scorecard => SourceData::Scorecard(crate::collect::snapshot::ScorecardStats {
                    score: 8.0,
                    generated_at: None,
                    checks: Vec::new(),
                }),
            }
        }
    }

    #[async_trait]
    impl SourceCollector for FakeCollector {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn fetch_all(&self, _repo: &RepoKey) -> Result<SourceData, FetchError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::Transient(ohno::app_err!("synthetic failure")));
            }
            Ok(self.payload())
        }

        async fn fetch_since(&self, _repo: &RepoKey, since: DateTime<Utc>) -> Result<SourceData, FetchError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_since.lock().unwrap() = Some(since);
            if self.fail {
                return Err(FetchError::Transient(ohno::app_err!("synthetic failure")));
            }
            Ok(self.payload())
        }
    }

    fn repo() -> RepoKey {
        RepoKey::parse("acme/widgets").unwrap()
    }

    fn orchestrator(collectors: Vec<Arc<FakeCollector>>) -> (Orchestrator, Arc<MemoryStore>, StateTracker) {
        let store = Arc::new(MemoryStore::new());
        let tracker = StateTracker::new(store.clone(), 1440);
        let config = OrchestratorConfig {
            courtesy_delay: core::time::Duration::ZERO,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            store.clone(),
            tracker.clone(),
            collectors.into_iter().map(|c| c as Arc<dyn SourceCollector>).collect(),
            config,
        );
        (orchestrator, store, tracker)
    }

    fn all_ok() -> Vec<Arc<FakeCollector>> {
        SourceKind::all().map(FakeCollector::ok).collect()
    }

    #[tokio::test]
    async fn baseline_pass_completes_all_sources() {
        let (orchestrator, store, _) = orchestrator(all_ok());

        let outcome = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        assert!(outcome.is_success());
        assert!(outcome.is_complete);
        assert!(!outcome.is_partial);
        assert_eq!(outcome.succeeded.len(), SourceKind::COUNT);
        assert!(outcome.snapshot_updated);

        let snapshot: Option<ActivitySnapshot> = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap();
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.stats.stars, 5);
        assert_eq!(snapshot.counts.commits, 1);

        let metrics: Option<DerivedMetrics> = store::get_json(store.as_ref(), &keys::metrics(&repo())).unwrap();
        assert!(metrics.unwrap().activity_score > 0.0);
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_results() {
        let collectors: Vec<Arc<FakeCollector>> = SourceKind::all()
            .map(|kind| {
                if matches!(kind, SourceKind::Issues | SourceKind::Cdn | SourceKind::Scorecard) {
                    FakeCollector::failing(kind)
                } else {
                    FakeCollector::ok(kind)
                }
            })
            .collect();
        let (orchestrator, store, tracker) = orchestrator(collectors);

        let outcome = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        // Partial data was persisted, so the pass itself succeeded.
        assert!(outcome.is_success());
        assert!(outcome.is_partial);
        assert!(!outcome.is_complete);
        assert_eq!(outcome.succeeded.len(), 5);
        assert_eq!(outcome.failed.len(), 3);
        assert!(outcome.snapshot_updated);

        // Successful sources' data landed despite the failures.
        let snapshot: Option<ActivitySnapshot> = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap();
        assert_eq!(snapshot.unwrap().stats.stars, 5);

        // The failures are indexed for retry.
        let stats = tracker.stats().unwrap();
        assert_eq!(stats.retry_queue_len, 1);
        assert_eq!(stats.failed_repos, 1);
    }

    #[tokio::test]
    async fn fully_failed_baseline_persists_nothing() {
        let collectors: Vec<Arc<FakeCollector>> = SourceKind::all().map(FakeCollector::failing).collect();
        let (orchestrator, store, _) = orchestrator(collectors);

        let outcome = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        assert!(!outcome.is_success());
        assert!(!outcome.snapshot_updated);
        assert_eq!(outcome.failed.len(), SourceKind::COUNT);

        let snapshot: Option<ActivitySnapshot> = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap();
        assert!(snapshot.is_none());
    }

    #[tokio::test]
    async fn resume_skips_completed_sources() {
        let collectors = all_ok();
        let (orchestrator, _, tracker) = orchestrator(collectors.clone());
        let now = Utc::now();

        // Five sources already completed by an earlier pass.
        for kind in SourceKind::all().take(5) {
            tracker.mark_completed(&repo(), kind, 0, now).unwrap();
        }

        let outcome = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        assert_eq!(outcome.attempted.len(), 3);
        assert!(outcome.is_complete);
        for collector in collectors.iter().take(5) {
            assert_eq!(collector.calls.load(Ordering::SeqCst), 0, "completed source {} was re-fetched", collector.kind);
        }
    }

    #[tokio::test]
    async fn failed_sources_wait_out_backoff() {
        let collectors = all_ok();
        let (orchestrator, _, tracker) = orchestrator(collectors.clone());
        let now = Utc::now();

        for kind in SourceKind::all() {
            if kind == SourceKind::Commits {
                let _ = tracker.mark_failed(&repo(), kind, "boom", now).unwrap();
            } else {
                tracker.mark_completed(&repo(), kind, 0, now).unwrap();
            }
        }

        let outcome = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        // The failed source is inside its backoff window, nothing is due.
        assert!(outcome.attempted.is_empty());
        assert!(!outcome.snapshot_updated);
    }

    #[tokio::test]
    async fn incremental_pass_fetches_since_last_update() {
        let collectors = all_ok();
        let (orchestrator, store, tracker) = orchestrator(collectors.clone());
        let _ = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        let baseline: ActivitySnapshot = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap().unwrap();

        // Invalidate one source so the next pass has something to do.
        let mut state = tracker.get(&repo()).unwrap().unwrap();
        let _ = state.sources.insert(SourceKind::Commits, crate::collect::state::SourceState::default());
        crate::store::set_json(store.as_ref(), &keys::state(&repo()), &state).unwrap();

        let _ = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        let commits = collectors.iter().find(|c| c.kind == SourceKind::Commits).unwrap();
        let since = commits.last_since.lock().unwrap().expect("incremental fetch used fetch_since");
        assert_eq!(since, baseline.last_updated_at);
    }

    #[tokio::test]
    async fn force_refetches_everything_but_keeps_eligibility() {
        let (orchestrator, store, _) = orchestrator(all_ok());
        let _ = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        // An approval workflow annotates the snapshot out of band.
        let mut snapshot: ActivitySnapshot = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap().unwrap();
        snapshot.eligibility = serde_json::json!({"approved": true, "tier": 1});
        store::set_json(store.as_ref(), &keys::snapshot(&repo()), &snapshot).unwrap();

        let outcome = orchestrator.run(&repo(), CollectOptions { force: true }).await.unwrap();
        assert_eq!(outcome.attempted.len(), SourceKind::COUNT);

        let after: ActivitySnapshot = store::get_json(store.as_ref(), &keys::snapshot(&repo())).unwrap().unwrap();
        assert_eq!(after.eligibility, serde_json::json!({"approved": true, "tier": 1}));
    }

    #[tokio::test]
    async fn missing_collector_is_a_per_source_failure() {
        // Only one collector configured; the rest fail individually.
        let (orchestrator, _, _) = orchestrator(vec![FakeCollector::ok(SourceKind::BasicStats)]);

        let outcome = orchestrator.run(&repo(), CollectOptions::default()).await.unwrap();

        assert_eq!(outcome.succeeded, vec![SourceKind::BasicStats]);
        assert_eq!(outcome.failed.len(), SourceKind::COUNT - 1);
        assert!(outcome.snapshot_updated);
    }
}
