//! Source collectors.
//!
//! A source is one upstream feed of repository data. The five hosting sources
//! share a client and credential pool; registry, CDN, and scorecard each have
//! their own unauthenticated client.

pub mod cdn;
pub mod hosting;
pub mod registry;
pub mod scorecard;

pub use cdn::CdnCollector;
pub use hosting::{HostingClient, HostingCollector, HostingConfig};
pub use registry::RegistryCollector;
pub use scorecard::ScorecardCollector;

use super::RepoKey;
use super::snapshot::{ActivityDelta, BasicStats, CdnStats, CommitItem, IssueItem, PullRequestItem, RegistryStats, ReleaseItem, ScorecardStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core::fmt::{Display, Formatter};
use ohno::AppError;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

/// The eight sources collected per repository.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    BasicStats,
    PullRequests,
    Issues,
    Commits,
    Releases,
    Registry,
    Cdn,
    Scorecard,
}

impl SourceKind {
    pub const COUNT: usize = 8;

    /// All source kinds in their canonical order.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    /// Whether this source runs in the concurrent group of a collection pass.
    ///
    /// The hosting activity feeds (pull requests, issues, commits, releases)
    /// hit the same rate-limited API and run sequentially; everything else is
    /// independent and runs concurrently.
    #[must_use]
    pub const fn is_independent(self) -> bool {
        matches!(self, Self::BasicStats | Self::Registry | Self::Cdn | Self::Scorecard)
    }
}

/// Rate limit status reported by an upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Remaining requests in the current window.
    pub remaining: i64,

    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

/// Why a source fetch failed, classified for the retry machinery.
#[derive(Debug)]
pub enum FetchError {
    /// The upstream quota is exhausted until `reset_at`. Retryable, and a
    /// trigger for credential rotation on the hosting sources.
    RateLimited { reset_at: DateTime<Utc> },

    /// The credential was rejected. Not retryable with the same credential.
    Auth(AppError),

    /// Network trouble or a server-side error. Retryable.
    Transient(AppError),
}

impl FetchError {
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Short description persisted as a source's `last_error`.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::RateLimited { reset_at } => format!("rate limited until {reset_at}"),
            Self::Auth(e) => format!("authentication failed: {e}"),
            Self::Transient(e) => format!("transient failure: {e}"),
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl core::error::Error for FetchError {}

/// The payload a single source produced for one fetch.
#[derive(Debug, Clone)]
pub enum SourceData {
    BasicStats(BasicStats),
    PullRequests(Vec<PullRequestItem>),
    Issues(Vec<IssueItem>),
    Commits(Vec<CommitItem>),
    Releases(Vec<ReleaseItem>),
    Registry(RegistryStats),
    Cdn(CdnStats),
    Scorecard(ScorecardStats),
}

impl SourceData {
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::BasicStats(_) => SourceKind::BasicStats,
            Self::PullRequests(_) => SourceKind::PullRequests,
            Self::Issues(_) => SourceKind::Issues,
            Self::Commits(_) => SourceKind::Commits,
            Self::Releases(_) => SourceKind::Releases,
            Self::Registry(_) => SourceKind::Registry,
            Self::Cdn(_) => SourceKind::Cdn,
            Self::Scorecard(_) => SourceKind::Scorecard,
        }
    }

    /// Number of items fetched; scalar payloads count as one.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        match self {
            Self::PullRequests(items) => items.len() as u64,
            Self::Issues(items) => items.len() as u64,
            Self::Commits(items) => items.len() as u64,
            Self::Releases(items) => items.len() as u64,
            Self::BasicStats(_) | Self::Registry(_) | Self::Cdn(_) | Self::Scorecard(_) => 1,
        }
    }

    /// Fold this payload into the per-pass delta.
    pub fn accumulate(self, delta: &mut ActivityDelta, scalars: &mut super::snapshot::ScalarUpdate) {
        match self {
            Self::BasicStats(stats) => scalars.stats = Some(stats),
            Self::PullRequests(items) => delta.new_prs.extend(items),
            Self::Issues(items) => delta.new_issues.extend(items),
            Self::Commits(items) => delta.new_commits.extend(items),
            Self::Releases(items) => delta.new_releases.extend(items),
            Self::Registry(stats) => scalars.registry = Some(stats),
            Self::Cdn(stats) => scalars.cdn = Some(stats),
            Self::Scorecard(stats) => scalars.scorecard = Some(stats),
        }
    }
}

/// Classify a response from one of the unauthenticated feeds.
///
/// 429 is quota exhaustion (honoring `Retry-After` when present, defaulting to
/// one hour); every other non-success status is transient.
pub(crate) fn classify(resp: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let delay_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(3600);
        return Err(FetchError::RateLimited {
            reset_at: Utc::now() + chrono::Duration::seconds(delay_secs),
        });
    }

    let error = resp.error_for_status().expect_err("status is not successful at this point");
    Err(FetchError::Transient(error.into()))
}

/// One upstream feed of repository data.
///
/// `fetch_since` supports incremental passes; sources without a time dimension
/// (the scalar feeds) return their current value from both methods.
#[async_trait]
pub trait SourceCollector: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Full lookback fetch, used for baseline collection.
    async fn fetch_all(&self, repo: &RepoKey) -> Result<SourceData, FetchError>;

    /// Incremental fetch of everything changed since `since`.
    async fn fetch_since(&self, repo: &RepoKey, since: DateTime<Utc>) -> Result<SourceData, FetchError>;
}
