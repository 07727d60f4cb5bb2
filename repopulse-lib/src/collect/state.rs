//! Per-repository collection state and the tracker that persists it.
//!
//! Every source moves through `pending -> in_progress -> completed | failed`.
//! Whether a repository's collection is complete or partial is always derived
//! from the per-source statuses, never stored. Failed sources carry a
//! `next_retry_at` computed with exponential backoff, and the tracker mirrors
//! that schedule into two store-side indices so the retry scheduler can find
//! due work without scanning every repository.

use super::RepoKey;
use super::sources::SourceKind;
use crate::store::{self, StateStore, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = "     state";

/// Lifecycle of a single source within one repository's collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Collection bookkeeping for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub status: SourceStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub item_count: Option<u64>,
}

/// Collection bookkeeping for one repository, covering all eight sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    pub repo: RepoKey,
    pub created_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub sources: BTreeMap<SourceKind, SourceState>,
}

impl CollectionState {
    #[must_use]
    pub fn new(repo: RepoKey, now: DateTime<Utc>) -> Self {
        Self {
            repo,
            created_at: now,
            attempt_count: 0,
            sources: SourceKind::all().map(|kind| (kind, SourceState::default())).collect(),
        }
    }

    /// Look up a source's state, tolerating records written before a source
    /// kind existed.
    #[must_use]
    pub fn source(&self, kind: SourceKind) -> SourceState {
        self.sources.get(&kind).cloned().unwrap_or_default()
    }

    /// Every source completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        SourceKind::all().all(|kind| self.source(kind).status == SourceStatus::Completed)
    }

    /// At least one source completed, but not all.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        let completed = self.completed_count();
        completed > 0 && completed < SourceKind::COUNT
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        SourceKind::all().filter(|&kind| self.source(kind).status == SourceStatus::Completed).count()
    }

    #[must_use]
    pub fn failed_sources(&self) -> Vec<SourceKind> {
        SourceKind::all().filter(|&kind| self.source(kind).status == SourceStatus::Failed).collect()
    }

    /// Most recent attempt across all sources.
    #[must_use]
    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        SourceKind::all().filter_map(|kind| self.source(kind).last_attempt_at).max()
    }

    /// Earliest scheduled retry across failed sources.
    #[must_use]
    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        SourceKind::all()
            .map(|kind| self.source(kind))
            .filter(|s| s.status == SourceStatus::Failed)
            .filter_map(|s| s.next_retry_at)
            .min()
    }
}

/// Retry delay after `retry_count` failures: `min(2^retry_count, cap)` minutes.
#[must_use]
pub fn backoff_delay(retry_count: u32, cap_minutes: i64) -> chrono::Duration {
    let minutes = 2i64.checked_pow(retry_count.min(30)).unwrap_or(i64::MAX);
    chrono::Duration::minutes(minutes.min(cap_minutes))
}

/// Aggregate counts across the tracker's store-side indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Repositories with a scheduled retry.
    pub retry_queue_len: u64,

    /// Repositories with at least one failed source.
    pub failed_repos: u64,
}

/// Persists [`CollectionState`] records and maintains the retry and failure
/// indices.
///
/// The retry index scores each repository by its `next_retry_at`; the failure
/// index scores by the failing attempt's timestamp. A repository is removed
/// from both the moment all of its sources complete.
#[derive(Clone)]
pub struct StateTracker {
    store: Arc<dyn StateStore>,
    backoff_cap_minutes: i64,
}

impl StateTracker {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, backoff_cap_minutes: i64) -> Self {
        Self {
            store,
            backoff_cap_minutes,
        }
    }

    /// Load a repository's state, if any.
    pub fn get(&self, repo: &RepoKey) -> crate::Result<Option<CollectionState>> {
        store::get_json(self.store.as_ref(), &keys::state(repo))
    }

    /// Load a repository's state, creating a fresh all-pending record if none
    /// exists.
    pub fn initialize(&self, repo: &RepoKey, now: DateTime<Utc>) -> crate::Result<CollectionState> {
        if let Some(existing) = self.get(repo)? {
            return Ok(existing);
        }

        let state = CollectionState::new(repo.clone(), now);
        self.save(&state)?;
        Ok(state)
    }

    /// Begin a collection pass: bump the attempt counter and return the state.
    pub fn begin_pass(&self, repo: &RepoKey, now: DateTime<Utc>) -> crate::Result<CollectionState> {
        let mut state = self.initialize(repo, now)?;
        state.attempt_count += 1;
        self.save(&state)?;
        Ok(state)
    }

    pub fn mark_in_progress(&self, repo: &RepoKey, kind: SourceKind, now: DateTime<Utc>) -> crate::Result<()> {
        self.update(repo, kind, now, |source| {
            source.status = SourceStatus::InProgress;
            source.started_at = Some(now);
            source.last_attempt_at = Some(now);
        })?;
        Ok(())
    }

    /// Record a successful fetch. Clears the source's retry schedule, and once
    /// every source is complete, drops the repository from both indices.
    pub fn mark_completed(&self, repo: &RepoKey, kind: SourceKind, item_count: u64, now: DateTime<Utc>) -> crate::Result<()> {
        let state = self.update(repo, kind, now, |source| {
            source.status = SourceStatus::Completed;
            source.started_at = None;
            source.last_success_at = Some(now);
            source.retry_count = 0;
            source.next_retry_at = None;
            source.last_error = None;
            source.item_count = Some(item_count);
        })?;

        if state.is_complete() {
            let member = repo.to_string();
            self.store.zrem(keys::RETRY_INDEX, &member)?;
            self.store.zrem(keys::FAILURE_INDEX, &member)?;
            log::info!(target: LOG_TARGET, "Collection complete for {repo} after {} attempt(s)", state.attempt_count);
        }

        Ok(())
    }

    /// Record a failed fetch: bump the retry count, schedule the next retry
    /// with exponential backoff, and index the repository for the scheduler.
    ///
    /// The repository's score in the retry index is the latest failure's
    /// `next_retry_at`; a repeated failure pushes the whole repository out.
    pub fn mark_failed(&self, repo: &RepoKey, kind: SourceKind, error: &str, now: DateTime<Utc>) -> crate::Result<DateTime<Utc>> {
        let mut next_retry_at = now;
        let _ = self.update(repo, kind, now, |source| {
            source.status = SourceStatus::Failed;
            source.started_at = None;
            source.last_attempt_at = Some(now);
            source.retry_count += 1;
            next_retry_at = now + backoff_delay(source.retry_count, self.backoff_cap_minutes);
            source.next_retry_at = Some(next_retry_at);
            source.last_error = Some(error.to_string());
        })?;

        let member = repo.to_string();
        self.store.zadd(keys::RETRY_INDEX, &member, next_retry_at.timestamp())?;
        self.store.zadd(keys::FAILURE_INDEX, &member, now.timestamp())?;

        log::debug!(target: LOG_TARGET, "{repo}/{kind} failed, next retry at {next_retry_at}: {error}");
        Ok(next_retry_at)
    }

    /// The sources a collection pass should fetch right now.
    ///
    /// Pending sources are always due. Failed sources are due once their
    /// backoff expires. An in-progress mark can only have been left behind by
    /// a crashed pass, since a single writer per repository is assumed, so it
    /// is retryable immediately.
    #[must_use]
    pub fn sources_needing_collection(&self, state: &CollectionState, now: DateTime<Utc>) -> Vec<SourceKind> {
        SourceKind::all()
            .filter(|&kind| {
                let source = state.source(kind);
                match source.status {
                    SourceStatus::Pending | SourceStatus::InProgress => true,
                    SourceStatus::Completed => false,
                    SourceStatus::Failed => source.next_retry_at.is_none_or(|at| at <= now),
                }
            })
            .collect()
    }

    /// Reset every failed source back to pending and clear the repository
    /// from both indices. Returns how many sources were reset.
    pub fn reset_failed(&self, repo: &RepoKey) -> crate::Result<usize> {
        let Some(mut state) = self.get(repo)? else {
            return Ok(0);
        };

        let failed = state.failed_sources();
        for kind in &failed {
            let _ = state.sources.insert(
                *kind,
                SourceState {
                    last_attempt_at: state.source(*kind).last_attempt_at,
                    ..SourceState::default()
                },
            );
        }
        self.save(&state)?;

        let member = repo.to_string();
        self.store.zrem(keys::RETRY_INDEX, &member)?;
        self.store.zrem(keys::FAILURE_INDEX, &member)?;

        Ok(failed.len())
    }

    /// Repositories whose scheduled retry time has arrived, soonest first.
    pub fn due_retries(&self, now: DateTime<Utc>, limit: usize) -> crate::Result<Vec<RepoKey>> {
        let members = self.store.zrange_by_score(keys::RETRY_INDEX, i64::MIN, now.timestamp(), limit)?;
        Ok(parse_members(&members))
    }

    /// Repositories with failed sources, oldest failure first.
    pub fn failed_collections(&self, limit: usize) -> crate::Result<Vec<RepoKey>> {
        let members = self.store.zrange_by_score(keys::FAILURE_INDEX, i64::MIN, i64::MAX, limit)?;
        Ok(parse_members(&members))
    }

    pub fn stats(&self) -> crate::Result<TrackerStats> {
        Ok(TrackerStats {
            retry_queue_len: self.store.zcard(keys::RETRY_INDEX)?,
            failed_repos: self.store.zcard(keys::FAILURE_INDEX)?,
        })
    }

    fn save(&self, state: &CollectionState) -> crate::Result<()> {
        store::set_json(self.store.as_ref(), &keys::state(&state.repo), state)
    }

    fn update(
        &self,
        repo: &RepoKey,
        kind: SourceKind,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut SourceState),
    ) -> crate::Result<CollectionState> {
        let mut state = self.initialize(repo, now)?;
        let mut source = state.source(kind);
        f(&mut source);
        let _ = state.sources.insert(kind, source);
        self.save(&state)?;
        Ok(state)
    }
}

fn parse_members(members: &[String]) -> Vec<RepoKey> {
    members
        .iter()
        .filter_map(|member| match RepoKey::parse(member) {
            Ok(repo) => Some(repo),
            Err(e) => {
                log::warn!(target: LOG_TARGET, "Skipping unparsable index member '{member}': {e}");
                None
            }
        })
        .collect()
}
