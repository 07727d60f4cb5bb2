//! Package registry download statistics.

use super::super::RepoKey;
use super::super::snapshot::RegistryStats;
use super::super::throttler::Throttler;
use super::{FetchError, SourceCollector, SourceData, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const LOG_TARGET: &str = "  registry";

pub const DEFAULT_BASE_URL: &str = "https://api.npmjs.org";

/// Fetches monthly download counts from the package registry.
///
/// The published package usually shares the repository's name; exceptions are
/// handled through an explicit override map keyed by `owner/name`.
pub struct RegistryCollector {
    client: reqwest::Client,
    base_url: String,
    throttler: Arc<Throttler>,
    package_overrides: HashMap<String, String>,
}

impl RegistryCollector {
    pub fn new(base_url: impl Into<String>, package_overrides: HashMap<String, String>) -> crate::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().user_agent("repopulse").build()?,
            base_url: base_url.into(),
            throttler: Throttler::new(2),
            package_overrides,
        })
    }

    /// The registry package published from a repository.
    #[must_use]
    pub fn package_for(&self, repo: &RepoKey) -> String {
        self.package_overrides
            .get(&repo.to_string())
            .cloned()
            .unwrap_or_else(|| repo.name().to_lowercase())
    }

    async fn fetch(&self, repo: &RepoKey) -> Result<SourceData, FetchError> {
        let package = self.package_for(repo);
        let url = format!("{}/downloads/point/last-month/{package}", self.base_url);

        let _permit = self.throttler.acquire().await;
        let resp = self.client.get(&url).send().await.map_err(|e| FetchError::Transient(e.into()))?;
        let resp = super::classify(resp)?;

        let api: ApiDownloads = resp.json().await.map_err(|e| FetchError::Transient(e.into()))?;
        log::debug!(target: LOG_TARGET, "Package '{package}': {} downloads last month", api.downloads);

        Ok(SourceData::Registry(RegistryStats {
            package,
            downloads_last_month: api.downloads,
        }))
    }
}

#[async_trait]
impl SourceCollector for RegistryCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::Registry
    }

    async fn fetch_all(&self, repo: &RepoKey) -> Result<SourceData, FetchError> {
        self.fetch(repo).await
    }

    // Download counts have no history dimension; an incremental pass refetches
    // the current value.
    async fn fetch_since(&self, repo: &RepoKey, _since: DateTime<Utc>) -> Result<SourceData, FetchError> {
        self.fetch(repo).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiDownloads {
    downloads: u64,
}
