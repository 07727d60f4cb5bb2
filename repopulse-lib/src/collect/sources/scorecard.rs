//! Supply-chain security scorecard.

use super::super::RepoKey;
use super::super::snapshot::{ScorecardCheck, ScorecardStats};
use super::super::throttler::Throttler;
use super::{FetchError, SourceCollector, SourceData, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;

const LOG_TARGET: &str = " scorecard";

pub const DEFAULT_BASE_URL: &str = "https://api.securityscorecards.dev";

/// Fetches the published security scorecard for a repository.
pub struct ScorecardCollector {
    client: reqwest::Client,
    base_url: String,
    throttler: Arc<Throttler>,
}

impl ScorecardCollector {
    pub fn new(base_url: impl Into<String>) -> crate::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().user_agent("repopulse").build()?,
            base_url: base_url.into(),
            throttler: Throttler::new(2),
        })
    }

    async fn fetch(&self, repo: &RepoKey) -> Result<SourceData, FetchError> {
        let url = format!("{}/projects/github.com/{}/{}", self.base_url, repo.owner(), repo.name());

        let _permit = self.throttler.acquire().await;
        let resp = self.client.get(&url).send().await.map_err(|e| FetchError::Transient(e.into()))?;
        let resp = super::classify(resp)?;

        let api: ApiScorecard = resp.json().await.map_err(|e| FetchError::Transient(e.into()))?;
        log::debug!(target: LOG_TARGET, "Scorecard for {repo}: {:.1}", api.score);

        Ok(SourceData::Scorecard(ScorecardStats {
            score: api.score,
            generated_at: api.date.and_then(parse_scorecard_date),
            checks: api
                .checks
                .into_iter()
                .map(|check| ScorecardCheck {
                    name: check.name,
                    score: check.score,
                })
                .collect(),
        }))
    }
}

/// Scorecard dates come as plain `YYYY-MM-DD`.
fn parse_scorecard_date(s: String) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[async_trait]
impl SourceCollector for ScorecardCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::Scorecard
    }

    async fn fetch_all(&self, repo: &RepoKey) -> Result<SourceData, FetchError> {
        self.fetch(repo).await
    }

    async fn fetch_since(&self, repo: &RepoKey, _since: DateTime<Utc>) -> Result<SourceData, FetchError> {
        self.fetch(repo).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiScorecard {
    score: f64,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    checks: Vec<ApiCheck>,
}

#[derive(Debug, Deserialize)]
struct ApiCheck {
    name: String,
    score: f64,
}
