//! Derived metrics computed from activity snapshots.
//!
//! Pure computation over a snapshot and a rolling window; no store or network
//! access. The orchestrator recomputes and persists these after every
//! successful collection pass.

use crate::collect::RepoKey;
use crate::collect::snapshot::ActivitySnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const DAYS_PER_WEEK: f64 = 7.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Activity metrics over a rolling window, derived entirely from one
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub repo: RepoKey,
    pub computed_at: DateTime<Utc>,
    pub window_days: i64,

    pub prs_opened: u64,
    pub prs_merged: u64,
    pub issues_opened: u64,
    pub issues_closed: u64,
    pub commit_count: u64,
    pub release_count: u64,

    /// Issues closed per issue opened within the window; 0 when none opened.
    pub issue_resolution_rate: f64,

    /// Median days from open to close, over issues closed in the window.
    pub median_issue_close_days: f64,

    /// Median days from open to merge, over pull requests merged in the window.
    pub median_pr_merge_days: f64,

    pub commits_per_week: f64,

    /// Distinct commit authors within the window.
    pub contributor_count: u64,

    pub downloads_last_month: u64,

    /// Composite activity indicator, 0 to 100.
    pub activity_score: f64,
}

impl DerivedMetrics {
    /// Compute metrics for a snapshot over the trailing `window_days`.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "counts fit in f64 for scoring")]
    pub fn compute(snapshot: &ActivitySnapshot, window_days: i64, now: DateTime<Utc>) -> Self {
        let cutoff = now - chrono::Duration::days(window_days);

        let prs_opened = snapshot.pull_requests.iter().filter(|pr| pr.created_at >= cutoff).count() as u64;
        let prs_merged = snapshot
            .pull_requests
            .iter()
            .filter(|pr| pr.merged_at.is_some_and(|at| at >= cutoff))
            .count() as u64;

        let issues_opened = snapshot.issues.iter().filter(|issue| issue.created_at >= cutoff).count() as u64;
        let issues_closed = snapshot
            .issues
            .iter()
            .filter(|issue| issue.closed_at.is_some_and(|at| at >= cutoff))
            .count() as u64;

        let commit_count = snapshot.commits.iter().filter(|c| c.committed_at >= cutoff).count() as u64;
        let release_count = snapshot.releases.iter().filter(|r| r.published_at >= cutoff).count() as u64;

        let issue_resolution_rate = if issues_opened == 0 {
            0.0
        } else {
            issues_closed as f64 / issues_opened as f64
        };

        let median_issue_close_days = median_days(snapshot.issues.iter().filter_map(|issue| {
            let closed_at = issue.closed_at.filter(|&at| at >= cutoff)?;
            Some((closed_at - issue.created_at).num_seconds())
        }));

        let median_pr_merge_days = median_days(snapshot.pull_requests.iter().filter_map(|pr| {
            let merged_at = pr.merged_at.filter(|&at| at >= cutoff)?;
            Some((merged_at - pr.created_at).num_seconds())
        }));

        let commits_per_week = commit_count as f64 * DAYS_PER_WEEK / window_days.max(1) as f64;

        let contributor_count = snapshot
            .commits
            .iter()
            .filter(|c| c.committed_at >= cutoff)
            .filter_map(|c| c.author.as_deref())
            .collect::<HashSet<_>>()
            .len() as u64;

        let downloads_last_month = snapshot.registry.as_ref().map_or(0, |r| r.downloads_last_month);

        let mut metrics = Self {
            repo: snapshot.repo.clone(),
            computed_at: now,
            window_days,
            prs_opened,
            prs_merged,
            issues_opened,
            issues_closed,
            commit_count,
            release_count,
            issue_resolution_rate,
            median_issue_close_days,
            median_pr_merge_days,
            commits_per_week,
            contributor_count,
            downloads_last_month,
            activity_score: 0.0,
        };
        metrics.activity_score = activity_score(&metrics, snapshot, now);
        metrics
    }
}

/// Median of a sequence of second counts, expressed in days. Negative
/// durations (clock skew in upstream data) are discarded.
#[expect(clippy::cast_precision_loss, reason = "durations fit in f64")]
fn median_days(seconds: impl Iterator<Item = i64>) -> f64 {
    let mut values: Vec<f64> = seconds.filter(|&s| s >= 0).map(|s| s as f64).collect();
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.partial_cmp(b).expect("no NaN values should be present"));
    percentile(&values, 50.0) / SECONDS_PER_DAY
}

fn percentile(sorted_data: &[f64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    #[expect(clippy::cast_possible_truncation, reason = "index calculation")]
    #[expect(clippy::cast_sign_loss, reason = "value is clamped to non-negative range")]
    #[expect(clippy::cast_precision_loss, reason = "index fits in usize")]
    let idx = (percentile / 100.0 * (sorted_data.len() - 1) as f64)
        .round()
        .clamp(0.0, (sorted_data.len() - 1) as f64) as usize;
    sorted_data[idx]
}

/// Weighted composite of commit cadence, review throughput, issue hygiene,
/// contributor breadth, recency, and adoption. Each component saturates, so
/// enormous repositories don't dominate purely on volume.
#[expect(clippy::cast_precision_loss, reason = "counts fit in f64 for scoring")]
fn activity_score(metrics: &DerivedMetrics, snapshot: &ActivitySnapshot, now: DateTime<Utc>) -> f64 {
    let commit_component = (metrics.commits_per_week / 10.0).min(1.0) * 30.0;
    let pr_component = (metrics.prs_merged as f64 / 20.0).min(1.0) * 20.0;
    let issue_component = metrics.issue_resolution_rate.min(1.0) * 15.0;
    let contributor_component = (metrics.contributor_count as f64 / 10.0).min(1.0) * 15.0;

    let recency_component = snapshot.stats.last_commit_at.map_or(0.0, |at| {
        let days_idle = (now - at).num_days().max(0) as f64;
        ((30.0 - days_idle) / 30.0).clamp(0.0, 1.0) * 10.0
    });

    // log10 scale: ~10M downloads/month saturates.
    let adoption_component = ((metrics.downloads_last_month as f64 + 1.0).log10() / 7.0).min(1.0) * 10.0;

    (commit_component + pr_component + issue_component + contributor_component + recency_component + adoption_component).clamp(0.0, 100.0)
}
