//! Webhook ingestion: real-time deltas between scheduled passes.
//!
//! Events land in a store-side FIFO and are applied asynchronously. Each
//! event id is processed at most once: the id enters the seen set the moment
//! processing starts, whether or not applying it succeeds, and membership
//! expires after a retention window. Events for repositories without a
//! baseline snapshot are dropped; the baseline pass will pick their content
//! up anyway.

use super::RepoKey;
use super::snapshot::{self, ActivityDelta, ActivitySnapshot, CommitItem, IssueItem, PullRequestItem, ReleaseItem, ScalarUpdate};
use crate::metrics::DerivedMetrics;
use crate::store::{self, StateStore, keys};
use chrono::{DateTime, Utc};
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const LOG_TARGET: &str = "   webhook";

/// One repository change pushed from the hosting platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Delivery id, unique per event. The at-most-once guarantee keys off
    /// this.
    pub id: String,

    /// `owner/name` of the repository the event belongs to.
    pub repo: String,

    pub received_at: DateTime<Utc>,

    #[serde(flatten)]
    pub change: WebhookChange,
}

/// The typed payload of a webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookChange {
    PullRequest { pull_request: PullRequestItem },
    Issue { issue: IssueItem },
    Push { commits: Vec<CommitItem> },
    Release { release: ReleaseItem },
}

impl WebhookChange {
    fn into_delta(self, until: DateTime<Utc>) -> ActivityDelta {
        let mut delta = ActivityDelta::new(None, until);
        match self {
            Self::PullRequest { pull_request } => delta.new_prs.push(pull_request),
            Self::Issue { issue } => delta.new_issues.push(issue),
            Self::Push { commits } => delta.new_commits.extend(commits),
            Self::Release { release } => delta.new_releases.push(release),
        }
        delta
    }
}

/// What happened to one dequeued event.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event's delta was merged into the snapshot.
    Applied { repo: RepoKey },

    /// The event id was already processed.
    Duplicate { id: String },

    /// The event was discarded without applying.
    Dropped { id: String, reason: String },

    /// The event could not be decoded or applied; details are in the error
    /// hash.
    Failed { id: String, error: String },
}

/// Totals from a [`WebhookProcessor::drain`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub applied: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Queues and applies webhook events against the snapshot store.
pub struct WebhookProcessor {
    store: Arc<dyn StateStore>,
    seen_ttl: core::time::Duration,
    window_days: i64,
    retention: chrono::Duration,
}

impl WebhookProcessor {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, seen_ttl: core::time::Duration, window_days: i64, retention: chrono::Duration) -> Self {
        Self {
            store,
            seen_ttl,
            window_days,
            retention,
        }
    }

    /// Enqueue a raw event. Returns `false` when the event id was already
    /// processed.
    ///
    /// Only the envelope's `id` is validated here; full decoding happens at
    /// processing time so one malformed event can't fail the ingest path.
    pub fn enqueue(&self, raw: &str) -> crate::Result<bool> {
        let envelope: serde_json::Value = serde_json::from_str(raw).into_app_err_with(|| "webhook event is not valid JSON")?;
        let Some(id) = envelope.get("id").and_then(|v| v.as_str()) else {
            return Err(app_err!("webhook event has no 'id' field"));
        };

        if self.store.sismember(keys::WEBHOOK_SEEN, id)? {
            log::debug!(target: LOG_TARGET, "Ignoring already-processed event '{id}'");
            return Ok(false);
        }

        self.store.rpush(keys::WEBHOOK_QUEUE, raw)?;
        Ok(true)
    }

    /// Apply the oldest queued event, if any.
    pub fn process_next(&self) -> crate::Result<Option<WebhookOutcome>> {
        let Some(raw) = self.store.lpop(keys::WEBHOOK_QUEUE)? else {
            return Ok(None);
        };

        Ok(Some(self.process_raw(&raw)?))
    }

    /// Apply queued events until the queue is empty or `limit` is reached.
    pub fn drain(&self, limit: usize) -> crate::Result<DrainStats> {
        let mut stats = DrainStats::default();

        for _ in 0..limit {
            let Some(outcome) = self.process_next()? else {
                break;
            };

            match outcome {
                WebhookOutcome::Applied { .. } => stats.applied += 1,
                WebhookOutcome::Duplicate { .. } => stats.duplicates += 1,
                WebhookOutcome::Dropped { .. } => stats.dropped += 1,
                WebhookOutcome::Failed { .. } => stats.failed += 1,
            }
        }

        Ok(stats)
    }

    pub fn queue_len(&self) -> crate::Result<u64> {
        self.store.llen(keys::WEBHOOK_QUEUE)
    }

    /// Processing errors recorded so far, keyed by event id.
    pub fn errors(&self) -> crate::Result<Vec<(String, String)>> {
        self.store.hget_all(keys::WEBHOOK_ERRORS)
    }

    fn process_raw(&self, raw: &str) -> crate::Result<WebhookOutcome> {
        // Pull the id out first so even an undecodable event can be deduped
        // and its error recorded.
        let id = serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str().map(String::from)))
            .unwrap_or_else(|| "unknown".to_string());

        if self.store.sismember(keys::WEBHOOK_SEEN, &id)? {
            return Ok(WebhookOutcome::Duplicate { id });
        }

        // At most once: seen before applied, so a crash mid-apply loses the
        // event rather than applying it twice.
        self.store.sadd(keys::WEBHOOK_SEEN, &id, Some(self.seen_ttl))?;

        let event: WebhookEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => return self.fail(id, format!("undecodable event: {e}")),
        };

        let repo = match RepoKey::parse(&event.repo) {
            Ok(repo) => repo,
            Err(e) => return self.fail(id, format!("bad repository key '{}': {e}", event.repo)),
        };

        let cached: Option<ActivitySnapshot> = store::get_json(self.store.as_ref(), &keys::snapshot(&repo))?;
        let Some(cached) = cached else {
            log::debug!(target: LOG_TARGET, "Dropping event '{id}' for {repo}: no baseline snapshot");
            return Ok(WebhookOutcome::Dropped {
                id,
                reason: format!("no baseline snapshot for {repo}"),
            });
        };

        let now = Utc::now();
        let delta = event.change.into_delta(now);
        let merged = snapshot::merge(&cached, &delta, &ScalarUpdate::default());
        let pruned = snapshot::prune(&merged, self.retention, now);
        store::set_json(self.store.as_ref(), &keys::snapshot(&repo), &pruned)?;

        let metrics = DerivedMetrics::compute(&pruned, self.window_days, now);
        store::set_json(self.store.as_ref(), &keys::metrics(&repo), &metrics)?;

        log::debug!(target: LOG_TARGET, "Applied event '{id}' to {repo}");
        Ok(WebhookOutcome::Applied { repo })
    }

    fn fail(&self, id: String, error: String) -> crate::Result<WebhookOutcome> {
        log::warn!(target: LOG_TARGET, "Event '{id}' failed: {error}");
        self.store.hset(keys::WEBHOOK_ERRORS, &id, &error)?;
        Ok(WebhookOutcome::Failed { id, error })
    }
}
