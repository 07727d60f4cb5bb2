//! CDN traffic statistics.

use super::super::RepoKey;
use super::super::snapshot::CdnStats;
use super::super::throttler::Throttler;
use super::{FetchError, SourceCollector, SourceData, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const LOG_TARGET: &str = "       cdn";

pub const DEFAULT_BASE_URL: &str = "https://data.jsdelivr.com";

/// Fetches monthly CDN hit and bandwidth totals for a repository's published
/// package.
pub struct CdnCollector {
    client: reqwest::Client,
    base_url: String,
    throttler: Arc<Throttler>,
    package_overrides: HashMap<String, String>,
}

impl CdnCollector {
    pub fn new(base_url: impl Into<String>, package_overrides: HashMap<String, String>) -> crate::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().user_agent("repopulse").build()?,
            base_url: base_url.into(),
            throttler: Throttler::new(2),
            package_overrides,
        })
    }

    fn package_for(&self, repo: &RepoKey) -> String {
        self.package_overrides
            .get(&repo.to_string())
            .cloned()
            .unwrap_or_else(|| repo.name().to_lowercase())
    }

    async fn fetch(&self, repo: &RepoKey) -> Result<SourceData, FetchError> {
        let package = self.package_for(repo);
        let url = format!("{}/v1/stats/packages/npm/{package}?period=month", self.base_url);

        let _permit = self.throttler.acquire().await;
        let resp = self.client.get(&url).send().await.map_err(|e| FetchError::Transient(e.into()))?;
        let resp = super::classify(resp)?;

        let api: ApiPackageStats = resp.json().await.map_err(|e| FetchError::Transient(e.into()))?;
        log::debug!(target: LOG_TARGET, "Package '{package}': {} hits last month", api.hits.total);

        Ok(SourceData::Cdn(CdnStats {
            package,
            hits_last_month: api.hits.total,
            bandwidth_last_month: api.bandwidth.total,
        }))
    }
}

#[async_trait]
impl SourceCollector for CdnCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::Cdn
    }

    async fn fetch_all(&self, repo: &RepoKey) -> Result<SourceData, FetchError> {
        self.fetch(repo).await
    }

    async fn fetch_since(&self, repo: &RepoKey, _since: DateTime<Utc>) -> Result<SourceData, FetchError> {
        self.fetch(repo).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiPackageStats {
    hits: ApiTotal,
    bandwidth: ApiTotal,
}

#[derive(Debug, Deserialize)]
struct ApiTotal {
    #[serde(default)]
    total: u64,
}
