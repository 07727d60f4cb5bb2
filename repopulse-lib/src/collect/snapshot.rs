//! The durable per-repository activity record and the merge engine that
//! reconciles incremental deltas into it.

use super::RepoKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A pull request, keyed by its number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestItem {
    pub number: u64,
    pub title: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// An issue, keyed by its number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueItem {
    pub number: u64,
    pub title: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// A commit, keyed by its sha.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitItem {
    pub sha: String,
    pub message: String,
    pub author: Option<String>,
    pub committed_at: DateTime<Utc>,
}

/// A release, keyed by its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseItem {
    pub id: u64,
    pub tag: String,
    pub name: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Always-current repository scalars, replaced wholesale on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicStats {
    pub stars: u64,
    pub forks: u64,
    pub archived: bool,
    pub last_commit_at: Option<DateTime<Utc>>,
}

/// Package registry download statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub package: String,
    pub downloads_last_month: u64,
}

/// CDN traffic statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnStats {
    pub package: String,
    pub hits_last_month: u64,
    pub bandwidth_last_month: u64,
}

/// One security-scorecard check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardCheck {
    pub name: String,
    pub score: f64,
}

/// Supply-chain security scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardStats {
    pub score: f64,
    pub generated_at: Option<DateTime<Utc>>,
    pub checks: Vec<ScorecardCheck>,
}

/// Aggregate item counts, always recomputed from the arrays they describe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub pull_requests: u64,
    pub issues: u64,
    pub commits: u64,
    pub releases: u64,
}

impl ItemCounts {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pull_requests + self.issues + self.commits + self.releases
    }
}

/// The durable historical activity record for one repository.
///
/// Item arrays are deduplicated by stable key and ordered by recency
/// descending. The `eligibility` block is owned by a separate approval
/// workflow: the pipeline copies it forward across refreshes and never edits
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub repo: RepoKey,
    pub collected_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    pub stats: BasicStats,
    pub registry: Option<RegistryStats>,
    pub cdn: Option<CdnStats>,
    pub scorecard: Option<ScorecardStats>,

    pub pull_requests: Vec<PullRequestItem>,
    pub issues: Vec<IssueItem>,
    pub commits: Vec<CommitItem>,
    pub releases: Vec<ReleaseItem>,
    pub counts: ItemCounts,

    #[serde(default)]
    pub eligibility: serde_json::Value,
}

impl ActivitySnapshot {
    #[must_use]
    pub fn new(repo: RepoKey, now: DateTime<Utc>) -> Self {
        Self {
            repo,
            collected_at: now,
            last_updated_at: now,
            stats: BasicStats::default(),
            registry: None,
            cdn: None,
            scorecard: None,
            pull_requests: Vec::new(),
            issues: Vec::new(),
            commits: Vec::new(),
            releases: Vec::new(),
            counts: ItemCounts::default(),
            eligibility: serde_json::Value::Null,
        }
    }

    /// Recompute the aggregate counts from the item arrays.
    pub fn recount(&mut self) {
        self.counts = ItemCounts {
            pull_requests: self.pull_requests.len() as u64,
            issues: self.issues.len() as u64,
            commits: self.commits.len() as u64,
            releases: self.releases.len() as u64,
        };
    }
}

/// An incremental fetch result. Transient: merged into a snapshot, never
/// persisted directly.
#[derive(Debug, Clone)]
pub struct ActivityDelta {
    pub new_prs: Vec<PullRequestItem>,
    pub new_issues: Vec<IssueItem>,
    pub new_commits: Vec<CommitItem>,
    pub new_releases: Vec<ReleaseItem>,
    pub since: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
}

impl ActivityDelta {
    #[must_use]
    pub fn new(since: Option<DateTime<Utc>>, until: DateTime<Utc>) -> Self {
        Self {
            new_prs: Vec::new(),
            new_issues: Vec::new(),
            new_commits: Vec::new(),
            new_releases: Vec::new(),
            since,
            until,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_prs.is_empty() && self.new_issues.is_empty() && self.new_commits.is_empty() && self.new_releases.is_empty()
    }
}

/// Replacement values for the always-current scalar blocks. A `None` field
/// means that source produced nothing this pass and the cached value stands.
#[derive(Debug, Clone, Default)]
pub struct ScalarUpdate {
    pub stats: Option<BasicStats>,
    pub registry: Option<RegistryStats>,
    pub cdn: Option<CdnStats>,
    pub scorecard: Option<ScorecardStats>,
}

/// Overlay `incoming` onto `cached` keyed by `key`, incoming wins on
/// collision, result ordered by `recency` descending.
fn overlay<T, K, FK, FT>(cached: &[T], incoming: &[T], key: FK, recency: FT) -> Vec<T>
where
    T: Clone,
    K: Ord,
    FK: Fn(&T) -> K,
    FT: Fn(&T) -> DateTime<Utc>,
{
    let mut map: BTreeMap<K, T> = cached.iter().map(|item| (key(item), item.clone())).collect();
    for item in incoming {
        let _ = map.insert(key(item), item.clone());
    }

    let mut merged: Vec<T> = map.into_values().collect();
    merged.sort_by(|a, b| recency(b).cmp(&recency(a)));
    merged
}

/// Merge an incremental delta and scalar refresh into a cached snapshot.
///
/// Item arrays are reconciled by stable key with the delta winning on
/// collision (so updated items replace their prior versions); scalar blocks
/// are replaced, not merged. Merging the same delta twice produces the same
/// snapshot as merging it once.
#[must_use]
pub fn merge(cached: &ActivitySnapshot, delta: &ActivityDelta, scalars: &ScalarUpdate) -> ActivitySnapshot {
    let mut merged = cached.clone();

    merged.pull_requests = overlay(&cached.pull_requests, &delta.new_prs, |pr| pr.number, |pr| pr.created_at);
    merged.issues = overlay(&cached.issues, &delta.new_issues, |issue| issue.number, |issue| issue.created_at);
    merged.commits = overlay(&cached.commits, &delta.new_commits, |c| c.sha.clone(), |c| c.committed_at);
    merged.releases = overlay(&cached.releases, &delta.new_releases, |r| r.id, |r| r.published_at);

    if let Some(stats) = &scalars.stats {
        merged.stats = stats.clone();
    }
    if let Some(registry) = &scalars.registry {
        merged.registry = Some(registry.clone());
    }
    if let Some(cdn) = &scalars.cdn {
        merged.cdn = Some(cdn.clone());
    }
    if let Some(scorecard) = &scalars.scorecard {
        merged.scorecard = Some(scorecard.clone());
    }

    merged.last_updated_at = delta.until;
    merged.recount();
    merged
}

/// Drop every item older than `now - retention` and recompute the counts.
///
/// Retention must comfortably exceed the rolling window used by the derived
/// metrics calculator; the default configuration retains 3 years against a
/// 12-month window.
#[must_use]
pub fn prune(snapshot: &ActivitySnapshot, retention: chrono::Duration, now: DateTime<Utc>) -> ActivitySnapshot {
    let cutoff = now - retention;
    let mut pruned = snapshot.clone();

    pruned.pull_requests.retain(|pr| pr.created_at >= cutoff);
    pruned.issues.retain(|issue| issue.created_at >= cutoff);
    pruned.commits.retain(|c| c.committed_at >= cutoff);
    pruned.releases.retain(|r| r.published_at >= cutoff);

    pruned.recount();
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoKey {
        RepoKey::parse("acme/widgets").unwrap()
    }

    fn ts(days_ago: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::days(days_ago)
    }

    fn pr(number: u64, days_ago: i64) -> PullRequestItem {
        PullRequestItem {
            number,
            title: format!("pr {number}"),
            author: Some("dev".to_string()),
            created_at: ts(days_ago),
            merged_at: None,
            closed_at: None,
        }
    }

    fn commit(sha: &str, days_ago: i64) -> CommitItem {
        CommitItem {
            sha: sha.to_string(),
            message: "change".to_string(),
            author: Some("dev".to_string()),
            committed_at: ts(days_ago),
        }
    }

    fn issue(number: u64, days_ago: i64) -> IssueItem {
        IssueItem {
            number,
            title: format!("issue {number}"),
            author: None,
            created_at: ts(days_ago),
            closed_at: None,
        }
    }

    fn release(id: u64, days_ago: i64) -> ReleaseItem {
        ReleaseItem {
            id,
            tag: format!("v0.{id}.0"),
            name: None,
            published_at: ts(days_ago),
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let mut base = ActivitySnapshot::new(repo(), ts(100));
        base.pull_requests = vec![pr(1, 50)];
        base.commits = vec![commit("aaa", 40)];
        base.recount();

        let mut delta = ActivityDelta::new(Some(ts(30)), ts(0));
        delta.new_prs = vec![pr(2, 10)];
        delta.new_commits = vec![commit("bbb", 5)];

        let once = merge(&base, &delta, &ScalarUpdate::default());
        let twice = merge(&once, &delta, &ScalarUpdate::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_deduplicates_and_delta_wins() {
        let mut base = ActivitySnapshot::new(repo(), ts(100));
        base.pull_requests = vec![pr(1, 50)];
        base.recount();

        let mut updated = pr(1, 50);
        updated.merged_at = Some(ts(2));

        let mut delta = ActivityDelta::new(Some(ts(30)), ts(0));
        delta.new_prs = vec![updated.clone()];

        let merged = merge(&base, &delta, &ScalarUpdate::default());
        assert_eq!(merged.pull_requests.len(), 1);
        assert_eq!(merged.pull_requests[0], updated);
        assert_eq!(merged.counts.pull_requests, 1);
    }

    #[test]
    fn merge_sorts_by_recency_descending() {
        let mut base = ActivitySnapshot::new(repo(), ts(100));
        base.commits = vec![commit("old", 90)];
        base.recount();

        let mut delta = ActivityDelta::new(None, ts(0));
        delta.new_commits = vec![commit("mid", 30), commit("new", 1)];

        let merged = merge(&base, &delta, &ScalarUpdate::default());
        let shas: Vec<&str> = merged.commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["new", "mid", "old"]);
    }

    #[test]
    fn merge_replaces_scalars_wholesale() {
        let mut base = ActivitySnapshot::new(repo(), ts(100));
        base.stats = BasicStats { stars: 10, forks: 2, archived: false, last_commit_at: Some(ts(40)) };
        base.registry = Some(RegistryStats { package: "widgets".to_string(), downloads_last_month: 100 });

        let scalars = ScalarUpdate {
            stats: Some(BasicStats { stars: 12, forks: 2, archived: true, last_commit_at: Some(ts(1)) }),
            ..ScalarUpdate::default()
        };

        let merged = merge(&base, &ActivityDelta::new(None, ts(0)), &scalars);
        assert_eq!(merged.stats.stars, 12);
        assert!(merged.stats.archived);
        // Registry produced nothing this pass, cached value stands.
        assert_eq!(merged.registry.as_ref().map(|r| r.downloads_last_month), Some(100));
    }

    #[test]
    fn merge_advances_last_updated_at() {
        let base = ActivitySnapshot::new(repo(), ts(100));
        let until = ts(0);

        let merged = merge(&base, &ActivityDelta::new(Some(ts(7)), until), &ScalarUpdate::default());
        assert_eq!(merged.last_updated_at, until);
    }

    #[test]
    fn merge_preserves_eligibility() {
        let mut base = ActivitySnapshot::new(repo(), ts(100));
        base.eligibility = serde_json::json!({"sponsor": "acme-fund", "tier": 2});

        let merged = merge(&base, &ActivityDelta::new(None, ts(0)), &ScalarUpdate::default());
        assert_eq!(merged.eligibility, base.eligibility);
    }

    #[test]
    fn prune_drops_items_older_than_cutoff() {
        let mut snapshot = ActivitySnapshot::new(repo(), ts(0));
        // 5 years of items against a 3-year retention.
        snapshot.pull_requests = vec![pr(1, 365 * 5), pr(2, 365)];
        snapshot.issues = vec![issue(1, 365 * 4), issue(2, 30)];
        snapshot.commits = vec![commit("ancient", 365 * 4), commit("recent", 10)];
        snapshot.releases = vec![release(1, 365 * 5), release(2, 100)];
        snapshot.recount();

        let pruned = prune(&snapshot, chrono::Duration::days(365 * 3), Utc::now());
        let cutoff = Utc::now() - chrono::Duration::days(365 * 3);

        assert!(pruned.pull_requests.iter().all(|p| p.created_at >= cutoff));
        assert!(pruned.issues.iter().all(|i| i.created_at >= cutoff));
        assert!(pruned.commits.iter().all(|c| c.committed_at >= cutoff));
        assert!(pruned.releases.iter().all(|r| r.published_at >= cutoff));

        assert_eq!(pruned.counts.pull_requests, pruned.pull_requests.len() as u64);
        assert_eq!(pruned.counts.issues, pruned.issues.len() as u64);
        assert_eq!(pruned.counts.commits, pruned.commits.len() as u64);
        assert_eq!(pruned.counts.releases, pruned.releases.len() as u64);
        assert_eq!(pruned.counts.total(), 4);
    }

    #[test]
    fn prune_preserves_eligibility_and_scalars() {
        let mut snapshot = ActivitySnapshot::new(repo(), ts(0));
        snapshot.stats.stars = 77;
        snapshot.eligibility = serde_json::json!({"approved": true});

        let pruned = prune(&snapshot, chrono::Duration::days(365), Utc::now());
        assert_eq!(pruned.stats.stars, 77);
        assert_eq!(pruned.eligibility, snapshot.eligibility);
    }

    #[test]
    fn empty_delta_is_empty() {
        let delta = ActivityDelta::new(None, ts(0));
        assert!(delta.is_empty());

        let mut with_commit = ActivityDelta::new(None, ts(0));
        with_commit.new_commits = vec![commit("x", 1)];
        assert!(!with_commit.is_empty());
    }
}
