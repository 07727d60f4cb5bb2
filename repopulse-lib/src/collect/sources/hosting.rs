//! Hosting API client and the collectors for the five hosting-backed sources.
//!
//! One authenticated client per credential; the rotation pool decides which
//! client serves a given fetch. The client tracks the quota headers from every
//! response so exhaustion is detected before a request is wasted on it.

use super::super::RepoKey;
use super::super::pool::RotationPool;
use super::super::snapshot::{BasicStats, CommitItem, IssueItem, PullRequestItem, ReleaseItem};
use super::super::throttler::Throttler;
use super::{FetchError, RateLimitInfo, SourceCollector, SourceData, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core::sync::atomic::{AtomicI64, Ordering};
use reqwest::header::{HeaderMap, LINK};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

const LOG_TARGET: &str = "   hosting";

/// Client for one hosting API credential.
///
/// Quota headers from each response are remembered so a later caller can see
/// whether this credential is worth trying.
#[derive(Debug)]
pub struct HostingClient {
    client: reqwest::Client,
    base_url: String,
    label: String,
    remaining: AtomicI64,
    reset_at: AtomicI64,
}

impl HostingClient {
    pub fn new(token: Option<&str>, base_url: impl Into<String>, label: impl Into<String>) -> crate::Result<Self> {
        use reqwest::header::{AUTHORIZATION, HeaderValue};

        let mut builder = reqwest::Client::builder().user_agent("repopulse");

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("token {t}"))?;
            auth_val.set_sensitive(true);

            let mut headers = HeaderMap::new();
            let _ = headers.insert(AUTHORIZATION, auth_val);

            builder = builder.default_headers(headers);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into(),
            label: label.into(),
            remaining: AtomicI64::new(i64::MAX),
            reset_at: AtomicI64::new(0),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Last quota status seen on this credential, if any response carried one.
    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimitInfo> {
        let remaining = self.remaining.load(Ordering::Acquire);
        if remaining == i64::MAX {
            return None;
        }

        let reset_at = DateTime::from_timestamp(self.reset_at.load(Ordering::Acquire), 0)?;
        Some(RateLimitInfo { remaining, reset_at })
    }

    /// Whether this credential is believed to have quota at `now`.
    #[must_use]
    pub fn has_quota(&self, now: DateTime<Utc>) -> bool {
        match self.rate_limit() {
            Some(info) => info.remaining > 0 || info.reset_at <= now,
            None => true,
        }
    }

    /// Issue a GET and classify the outcome for the retry machinery.
    pub async fn api_call(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let resp = self.client.get(url).send().await.map_err(|e| FetchError::Transient(e.into()))?;

        if let Some(info) = rate_limit_from_headers(resp.headers()) {
            self.remaining.store(info.remaining, Ordering::Release);
            self.reset_at.store(info.reset_at.timestamp(), Ordering::Release);
        }

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let error = resp.error_for_status().expect_err("status is not successful at this point");
            return Err(FetchError::Auth(error.into()));
        }

        // 403 and 429 signal quota exhaustion; without headers, assume a
        // one hour window.
        if matches!(status.as_u16(), 403 | 429) {
            let reset_at = rate_limit_from_headers(resp.headers())
                .map_or_else(|| Utc::now() + chrono::Duration::hours(1), |info| info.reset_at);
            return Err(FetchError::RateLimited { reset_at });
        }

        let error = resp.error_for_status().expect_err("status is not successful at this point");
        Err(FetchError::Transient(error.into()))
    }
}

fn rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse::<i64>().ok()?;
    let reset_timestamp = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse::<i64>().ok()?;
    let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;

    Some(RateLimitInfo { remaining, reset_at })
}

fn has_next_page(headers: &HeaderMap) -> bool {
    headers
        .get(LINK)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|link| link.contains(r#"rel="next""#))
}

/// Pagination and lookback bounds for the hosting feeds.
#[derive(Debug, Clone)]
pub struct HostingConfig {
    /// Baseline lookback window for a full fetch.
    pub lookback: chrono::Duration,
    pub per_page: u32,
    pub max_pages: u32,
    pub item_cap: usize,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            lookback: chrono::Duration::days(730),
            per_page: 100,
            max_pages: 20,
            item_cap: 2000,
        }
    }
}

/// Collector for one of the five hosting-backed sources.
///
/// All instances share the credential pool and the throttler, so the
/// concurrency cap and rotation decisions span every hosting fetch in flight.
pub struct HostingCollector {
    kind: SourceKind,
    pool: Arc<RotationPool<HostingClient>>,
    throttler: Arc<Throttler>,
    config: HostingConfig,
}

impl HostingCollector {
    /// Panics in debug builds if `kind` is not a hosting-backed source.
    #[must_use]
    pub fn new(kind: SourceKind, pool: Arc<RotationPool<HostingClient>>, throttler: Arc<Throttler>, config: HostingConfig) -> Self {
        debug_assert!(matches!(
            kind,
            SourceKind::BasicStats | SourceKind::PullRequests | SourceKind::Issues | SourceKind::Commits | SourceKind::Releases
        ));

        Self {
            kind,
            pool,
            throttler,
            config,
        }
    }

    async fn fetch_with(&self, client: &HostingClient, repo: &RepoKey, since: DateTime<Utc>) -> Result<SourceData, FetchError> {
        // Fail fast on a credential whose last response reported an empty
        // quota, instead of spending a request to learn the same thing.
        let now = Utc::now();
        if !client.has_quota(now) {
            let reset_at = client.rate_limit().map_or_else(|| now + chrono::Duration::hours(1), |info| info.reset_at);
            log::debug!(target: LOG_TARGET, "Credential '{}' has no quota until {reset_at}, skipping", client.label());
            return Err(FetchError::RateLimited { reset_at });
        }

        match self.kind {
            SourceKind::BasicStats => Ok(SourceData::BasicStats(self.fetch_basic_stats(client, repo).await?)),
            SourceKind::PullRequests => Ok(SourceData::PullRequests(self.fetch_pulls(client, repo, since).await?)),
            SourceKind::Issues => Ok(SourceData::Issues(self.fetch_issues(client, repo, since).await?)),
            SourceKind::Commits => Ok(SourceData::Commits(self.fetch_commits(client, repo, since).await?)),
            SourceKind::Releases => Ok(SourceData::Releases(self.fetch_releases(client, repo, since).await?)),
            _ => unreachable!("constructor rejects non-hosting kinds"),
        }
    }

    async fn fetch_basic_stats(&self, client: &HostingClient, repo: &RepoKey) -> Result<BasicStats, FetchError> {
        let url = format!("{}/repos/{}/{}", client.base_url(), repo.owner(), repo.name());

        let _permit = self.throttler.acquire().await;
        let resp = client.api_call(&url).await?;
        let api: ApiRepository = resp.json().await.map_err(|e| FetchError::Transient(e.into()))?;

        Ok(BasicStats {
            stars: api.stargazers_count.unwrap_or(0),
            forks: api.forks_count.unwrap_or(0),
            archived: api.archived.unwrap_or(false),
            last_commit_at: api.pushed_at,
        })
    }

    async fn fetch_pulls(&self, client: &HostingClient, repo: &RepoKey, since: DateTime<Utc>) -> Result<Vec<PullRequestItem>, FetchError> {
        // The pulls endpoint has no `since` filter; walk newest-first and stop
        // once a page crosses the cutoff.
        let path = format!(
            "{}/repos/{}/{}/pulls?state=all&sort=created&direction=desc&per_page={}",
            client.base_url(),
            repo.owner(),
            repo.name(),
            self.config.per_page
        );

        let pulls: Vec<ApiPullRequest> = self.paginate(client, &path, |pr: &ApiPullRequest| pr.created_at < since).await?;

        Ok(pulls
            .into_iter()
            .filter(|pr| pr.created_at >= since)
            .map(|pr| PullRequestItem {
                number: pr.number,
                title: pr.title.unwrap_or_default(),
                author: pr.user.map(|u| u.login),
                created_at: pr.created_at,
                merged_at: pr.merged_at,
                closed_at: pr.closed_at,
            })
            .collect())
    }

    async fn fetch_issues(&self, client: &HostingClient, repo: &RepoKey, since: DateTime<Utc>) -> Result<Vec<IssueItem>, FetchError> {
        let since_str = since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let path = format!(
            "{}/repos/{}/{}/issues?state=all&since={since_str}&per_page={}",
            client.base_url(),
            repo.owner(),
            repo.name(),
            self.config.per_page
        );

        let issues: Vec<ApiIssue> = self.paginate(client, &path, |_| false).await?;

        // The issues endpoint interleaves pull requests; drop them.
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| IssueItem {
                number: issue.number,
                title: issue.title.unwrap_or_default(),
                author: issue.user.map(|u| u.login),
                created_at: issue.created_at,
                closed_at: issue.closed_at,
            })
            .collect())
    }

    async fn fetch_commits(&self, client: &HostingClient, repo: &RepoKey, since: DateTime<Utc>) -> Result<Vec<CommitItem>, FetchError> {
        let since_str = since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let path = format!(
            "{}/repos/{}/{}/commits?since={since_str}&per_page={}",
            client.base_url(),
            repo.owner(),
            repo.name(),
            self.config.per_page
        );

        let commits: Vec<ApiCommitEntry> = self.paginate(client, &path, |_| false).await?;

        Ok(commits
            .into_iter()
            .map(|entry| {
                let info = entry.commit;
                CommitItem {
                    sha: entry.sha,
                    message: info.message.lines().next().unwrap_or_default().to_string(),
                    author: info.author.as_ref().and_then(|a| a.name.clone()),
                    committed_at: info.author.and_then(|a| a.date).unwrap_or(since),
                }
            })
            .collect())
    }

    async fn fetch_releases(&self, client: &HostingClient, repo: &RepoKey, since: DateTime<Utc>) -> Result<Vec<ReleaseItem>, FetchError> {
        let path = format!(
            "{}/repos/{}/{}/releases?per_page={}",
            client.base_url(),
            repo.owner(),
            repo.name(),
            self.config.per_page
        );

        // No server-side filter; releases arrive newest-first.
        let releases: Vec<ApiRelease> = self
            .paginate(client, &path, |r: &ApiRelease| r.published_at.is_some_and(|at| at < since))
            .await?;

        Ok(releases
            .into_iter()
            .filter_map(|r| {
                let published_at = r.published_at.filter(|&at| at >= since)?;
                Some(ReleaseItem {
                    id: r.id,
                    tag: r.tag_name,
                    name: r.name,
                    published_at,
                })
            })
            .collect())
    }

    /// Walk a paginated endpoint until the last page, the page cap, the item
    /// cap, or `past_cutoff` reports the feed has gone older than needed.
    async fn paginate<T: DeserializeOwned>(
        &self,
        client: &HostingClient,
        path: &str,
        past_cutoff: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>, FetchError> {
        let mut all = Vec::new();
        let mut page_num = 1u32;

        loop {
            let url = format!("{path}&page={page_num}");

            let permit = self.throttler.acquire().await;
            let resp = client.api_call(&url).await?;
            let more_pages = has_next_page(resp.headers());
            let items: Vec<T> = resp.json().await.map_err(|e| FetchError::Transient(e.into()))?;
            drop(permit);

            if items.is_empty() {
                break;
            }

            let crossed_cutoff = items.last().is_some_and(&past_cutoff);
            all.extend(items);

            if !more_pages || crossed_cutoff {
                break;
            }

            if all.len() >= self.config.item_cap {
                log::debug!(target: LOG_TARGET, "Reached item cap ({}) at page {page_num}, stopping pagination", self.config.item_cap);
                break;
            }

            page_num += 1;
            if page_num > self.config.max_pages {
                log::debug!(target: LOG_TARGET, "Reached page cap ({}) after {} items, stopping pagination", self.config.max_pages, all.len());
                break;
            }
        }

        all.truncate(self.config.item_cap);
        Ok(all)
    }
}

#[async_trait]
impl SourceCollector for HostingCollector {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_all(&self, repo: &RepoKey) -> Result<SourceData, FetchError> {
        let since = Utc::now() - self.config.lookback;
        self.fetch_since(repo, since).await
    }

    async fn fetch_since(&self, repo: &RepoKey, since: DateTime<Utc>) -> Result<SourceData, FetchError> {
        self.pool
            .with_rotation(|client| async move { self.fetch_with(&client, repo, since).await })
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ApiRepository {
    stargazers_count: Option<u64>,
    forks_count: Option<u64>,
    #[serde(default)]
    archived: Option<bool>,
    #[serde(default)]
    pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiPullRequest {
    number: u64,
    title: Option<String>,
    user: Option<ApiUser>,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: Option<String>,
    user: Option<ApiUser>,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    /// Present when the "issue" is actually a pull request.
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitEntry {
    sha: String,
    commit: ApiCommitInfo,
}

#[derive(Debug, Deserialize)]
struct ApiCommitInfo {
    message: String,
    author: Option<ApiCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitAuthor {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiRelease {
    id: u64,
    tag_name: String,
    name: Option<String>,
    published_at: Option<DateTime<Utc>>,
}
