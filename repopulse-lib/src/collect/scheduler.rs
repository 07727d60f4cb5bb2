//! Background scheduling: backoff retries and fleet-wide refresh.
//!
//! The scheduler never scans every repository. Due retries come from the
//! retry index the tracker maintains, and the periodic refresh walks the
//! approved set. Passes run one repository at a time with a pacing delay so
//! a big backlog doesn't stampede the upstreams.

use super::RepoKey;
use super::orchestrator::{CollectOptions, CollectionOutcome, Orchestrator};
use super::state::StateTracker;
use crate::store::{StateStore, keys};
use chrono::Utc;
use std::sync::Arc;

const LOG_TARGET: &str = " scheduler";

/// A snapshot of the scheduler's queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Repositories scheduled for retry (due or not).
    pub retry_queue_len: u64,

    /// Repositories scheduled for retry whose backoff has expired.
    pub due_now: u64,

    /// Repositories with at least one failed source.
    pub failed_repos: u64,

    /// Repositories covered by the fleet refresh.
    pub approved_repos: u64,
}

pub struct Scheduler {
    store: Arc<dyn StateStore>,
    tracker: StateTracker,
    orchestrator: Arc<Orchestrator>,

    /// Delay between consecutive repository passes.
    pacing: core::time::Duration,
}

impl Scheduler {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, tracker: StateTracker, orchestrator: Arc<Orchestrator>, pacing: core::time::Duration) -> Self {
        Self {
            store,
            tracker,
            orchestrator,
            pacing,
        }
    }

    /// Add a repository to the approved set covered by [`refresh_all`](Self::refresh_all).
    pub fn approve(&self, repo: &RepoKey) -> crate::Result<()> {
        self.store.sadd(keys::APPROVED, &repo.to_string(), None)?;
        log::info!(target: LOG_TARGET, "Approved {repo} for scheduled refresh");
        Ok(())
    }

    /// Remove a repository from the approved set.
    pub fn unapprove(&self, repo: &RepoKey) -> crate::Result<()> {
        self.store.srem(keys::APPROVED, &repo.to_string())
    }

    /// The approved set, sorted.
    pub fn approved(&self) -> crate::Result<Vec<RepoKey>> {
        let members = self.store.smembers(keys::APPROVED)?;
        Ok(members.iter().filter_map(|m| RepoKey::parse(m).ok()).collect())
    }

    /// Run a collection pass for every repository whose retry is due, up to
    /// `limit`. A pass that fails at the store level is logged and skipped;
    /// source-level failures are the orchestrator's business and reschedule
    /// themselves.
    pub async fn process_retries(&self, limit: usize) -> crate::Result<Vec<CollectionOutcome>> {
        let due = self.tracker.due_retries(Utc::now(), limit)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        log::info!(target: LOG_TARGET, "{} repository retry(ies) due", due.len());
        self.run_batch(&due).await
    }

    /// Run an incremental pass over every approved repository.
    pub async fn refresh_all(&self) -> crate::Result<Vec<CollectionOutcome>> {
        let approved = self.approved()?;
        if approved.is_empty() {
            log::info!(target: LOG_TARGET, "No approved repositories to refresh");
            return Ok(Vec::new());
        }

        log::info!(target: LOG_TARGET, "Refreshing {} approved repository(ies)", approved.len());
        self.run_batch(&approved).await
    }

    pub fn stats(&self) -> crate::Result<RetryStats> {
        let tracker_stats = self.tracker.stats()?;
        let due_now = self.tracker.due_retries(Utc::now(), usize::MAX)?.len() as u64;

        Ok(RetryStats {
            retry_queue_len: tracker_stats.retry_queue_len,
            due_now,
            failed_repos: tracker_stats.failed_repos,
            approved_repos: self.store.scard(keys::APPROVED)?,
        })
    }

    /// Process due retries forever, waking every `interval`. Every
    /// `refresh_interval` the loop additionally runs a whole-fleet refresh
    /// over the approved set, so healthy repositories keep accumulating data
    /// without any failure ever putting them in the retry queue.
    pub async fn run_loop(&self, interval: core::time::Duration, batch_limit: usize, refresh_interval: core::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        let mut last_refresh = tokio::time::Instant::now();

        loop {
            let _ = ticker.tick().await;

            match self.process_retries(batch_limit).await {
                Ok(outcomes) if outcomes.is_empty() => {
                    log::debug!(target: LOG_TARGET, "No retries due");
                }
                Ok(outcomes) => {
                    let recovered = outcomes.iter().filter(|o| o.is_complete).count();
                    log::info!(target: LOG_TARGET, "Processed {} retry(ies), {recovered} now complete", outcomes.len());
                }
                Err(e) => {
                    log::error!(target: LOG_TARGET, "Retry batch failed: {e}");
                }
            }

            if last_refresh.elapsed() >= refresh_interval {
                last_refresh = tokio::time::Instant::now();
                if let Err(e) = self.refresh_all().await {
                    log::error!(target: LOG_TARGET, "Fleet refresh failed: {e}");
                }
            }
        }
    }

    async fn run_batch(&self, repos: &[RepoKey]) -> crate::Result<Vec<CollectionOutcome>> {
        let mut outcomes = Vec::with_capacity(repos.len());

        for (i, repo) in repos.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing).await;
            }

            match self.orchestrator.run(repo, CollectOptions::default()).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    log::error!(target: LOG_TARGET, "Pass for {repo} failed: {e}");
                }
            }
        }

        Ok(outcomes)
    }
}
