//! Pipeline wiring: configuration and the assembled component set.

use super::RepoKey;
use super::orchestrator::{Orchestrator, OrchestratorConfig};
use super::pool::RotationPool;
use super::scheduler::Scheduler;
use super::sources::{
    CdnCollector, HostingClient, HostingCollector, HostingConfig, RegistryCollector, ScorecardCollector, SourceCollector, SourceKind,
};
use super::snapshot::ActivitySnapshot;
use super::state::StateTracker;
use super::throttler::Throttler;
use super::webhook::WebhookProcessor;
use crate::metrics::DerivedMetrics;
use crate::store::{self, StateStore, keys};
use std::collections::HashMap;
use std::sync::Arc;

/// All tunables for the pipeline, with defaults suitable for production use.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Baseline lookback for hosting activity history.
    pub lookback_days: i64,

    /// How much item history snapshots retain.
    pub retention_days: i64,

    /// Rolling window for derived metrics. Must be well inside the retention
    /// period.
    pub window_days: i64,

    /// Ceiling on the exponential retry backoff, in minutes.
    pub backoff_cap_minutes: i64,

    /// Pause between sequential hosting feed fetches.
    pub courtesy_delay: core::time::Duration,

    /// Delay between consecutive repository passes in scheduler batches.
    pub pacing: core::time::Duration,

    /// Concurrency cap across hosting API requests.
    pub max_concurrent: usize,

    /// Membership lifetime in the processed-webhook set.
    pub seen_ttl: core::time::Duration,

    pub hosting_base_url: String,
    pub registry_base_url: String,
    pub cdn_base_url: String,
    pub scorecard_base_url: String,

    /// Hosting feed pagination bounds.
    pub per_page: u32,
    pub max_pages: u32,
    pub item_cap: usize,

    /// Registry/CDN package names that differ from the repository name,
    /// keyed by `owner/name`.
    pub package_overrides: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 730,
            retention_days: 365 * 3,
            window_days: 365,
            backoff_cap_minutes: 1440,
            courtesy_delay: core::time::Duration::from_secs(2),
            pacing: core::time::Duration::from_secs(2),
            max_concurrent: 5,
            seen_ttl: core::time::Duration::from_secs(7 * 24 * 3600),
            hosting_base_url: "https://api.github.com".to_string(),
            registry_base_url: super::sources::registry::DEFAULT_BASE_URL.to_string(),
            cdn_base_url: super::sources::cdn::DEFAULT_BASE_URL.to_string(),
            scorecard_base_url: super::sources::scorecard::DEFAULT_BASE_URL.to_string(),
            per_page: 100,
            max_pages: 20,
            item_cap: 2000,
            package_overrides: HashMap::new(),
        }
    }
}

/// The assembled pipeline: store, tracker, orchestrator, scheduler, and
/// webhook processor sharing one configuration.
pub struct PipelineContext {
    pub store: Arc<dyn StateStore>,
    pub tracker: StateTracker,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Scheduler,
    pub webhooks: WebhookProcessor,
    window_days: i64,
}

impl PipelineContext {
    /// Wire a pipeline from an explicit collector set. Tests use this with
    /// fakes; [`with_live_sources`](Self::with_live_sources) is the
    /// production path.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, collectors: Vec<Arc<dyn SourceCollector>>, config: &PipelineConfig) -> Self {
        let tracker = StateTracker::new(Arc::clone(&store), config.backoff_cap_minutes);

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            tracker.clone(),
            collectors,
            OrchestratorConfig {
                window_days: config.window_days,
                retention: chrono::Duration::days(config.retention_days),
                courtesy_delay: config.courtesy_delay,
            },
        ));

        let scheduler = Scheduler::new(Arc::clone(&store), tracker.clone(), Arc::clone(&orchestrator), config.pacing);

        let webhooks = WebhookProcessor::new(
            Arc::clone(&store),
            config.seen_ttl,
            config.window_days,
            chrono::Duration::days(config.retention_days),
        );

        Self {
            store,
            tracker,
            orchestrator,
            scheduler,
            webhooks,
            window_days: config.window_days,
        }
    }

    /// Wire a pipeline against the real upstream APIs.
    ///
    /// `tokens` are hosting API credentials for the rotation pool; with none,
    /// a single unauthenticated client is used (subject to much tighter
    /// quotas).
    pub fn with_live_sources(store: Arc<dyn StateStore>, tokens: &[String], config: &PipelineConfig) -> crate::Result<Self> {
        let clients = if tokens.is_empty() {
            vec![HostingClient::new(None, &config.hosting_base_url, "anonymous")?]
        } else {
            tokens
                .iter()
                .enumerate()
                .map(|(i, token)| HostingClient::new(Some(token), &config.hosting_base_url, format!("token-{}", i + 1)))
                .collect::<crate::Result<Vec<_>>>()?
        };

        let pool = Arc::new(RotationPool::new(clients));
        let throttler = Throttler::new(config.max_concurrent);
        let hosting_config = HostingConfig {
            lookback: chrono::Duration::days(config.lookback_days),
            per_page: config.per_page,
            max_pages: config.max_pages,
            item_cap: config.item_cap,
        };

        let mut collectors: Vec<Arc<dyn SourceCollector>> = SourceKind::all()
            .filter(|kind| {
                matches!(
                    kind,
                    SourceKind::BasicStats | SourceKind::PullRequests | SourceKind::Issues | SourceKind::Commits | SourceKind::Releases
                )
            })
            .map(|kind| {
                Arc::new(HostingCollector::new(
                    kind,
                    Arc::clone(&pool),
                    Arc::clone(&throttler),
                    hosting_config.clone(),
                )) as Arc<dyn SourceCollector>
            })
            .collect();

        collectors.push(Arc::new(RegistryCollector::new(&config.registry_base_url, config.package_overrides.clone())?));
        collectors.push(Arc::new(CdnCollector::new(&config.cdn_base_url, config.package_overrides.clone())?));
        collectors.push(Arc::new(ScorecardCollector::new(&config.scorecard_base_url)?));

        Ok(Self::new(store, collectors, config))
    }

    /// Compute derived metrics for a repository from its persisted snapshot.
    ///
    /// `window_days` overrides the configured rolling window. Returns `None`
    /// when the repository has no snapshot yet.
    pub fn derived_metrics(&self, repo: &RepoKey, window_days: Option<i64>) -> crate::Result<Option<DerivedMetrics>> {
        let snapshot: Option<ActivitySnapshot> = store::get_json(self.store.as_ref(), &keys::snapshot(repo))?;
        let Some(snapshot) = snapshot else {
            return Ok(None);
        };

        let window = window_days.unwrap_or(self.window_days);
        Ok(Some(DerivedMetrics::compute(&snapshot, window, chrono::Utc::now())))
    }

    /// Human-readable collection status for one repository.
    pub fn describe(&self, repo: &RepoKey) -> crate::Result<Option<String>> {
        let Some(state) = self.tracker.get(repo)? else {
            return Ok(None);
        };

        let mut lines = vec![format!(
            "{repo}: {} ({} of {} sources complete, {} attempt(s))",
            if state.is_complete() {
                "complete"
            } else if state.is_partial() {
                "partial"
            } else {
                "pending"
            },
            state.completed_count(),
            SourceKind::COUNT,
            state.attempt_count,
        )];

        for kind in SourceKind::all() {
            let source = state.source(kind);
            let mut line = format!("  {kind}: {}", source.status);
            if let Some(count) = source.item_count {
                line.push_str(&format!(" ({count} items)"));
            }
            if let Some(at) = source.next_retry_at {
                line.push_str(&format!(", next retry {at}"));
            }
            if let Some(error) = &source.last_error {
                line.push_str(&format!(" [{error}]"));
            }
            lines.push(line);
        }

        Ok(Some(lines.join("\n")))
    }
}
