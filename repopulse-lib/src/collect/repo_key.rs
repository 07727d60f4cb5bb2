use core::fmt::{Display, Formatter};
use ohno::bail;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stable identity for a tracked repository: an `(owner, name)` pair.
///
/// Every persisted record (collection state, snapshot, metrics) is keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoKey {
    owner: Arc<str>,
    name: Arc<str>,
}

impl RepoKey {
    pub fn new(owner: impl AsRef<str>, name: impl AsRef<str>) -> crate::Result<Self> {
        let owner = owner.as_ref();
        let name = name.as_ref();

        if owner.is_empty() || name.is_empty() {
            bail!("repository key must have a non-empty owner and name");
        }

        if owner.contains('/') || name.contains('/') {
            bail!("repository owner and name must not contain '/': {owner}/{name}");
        }

        Ok(Self {
            owner: Arc::from(owner),
            name: Arc::from(name),
        })
    }

    /// Parse an `owner/name` string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.split_once('/') {
            Some((owner, name)) => Self::new(owner, name),
            None => bail!("invalid repository key '{s}', expected 'owner/name'"),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for RepoKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_owner_name() {
        let key = RepoKey::parse("acme/widgets").unwrap();
        assert_eq!(key.owner(), "acme");
        assert_eq!(key.name(), "widgets");
        assert_eq!(key.to_string(), "acme/widgets");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(RepoKey::parse("acme").is_err());
    }

    #[test]
    fn parse_rejects_empty_components() {
        assert!(RepoKey::parse("/widgets").is_err());
        assert!(RepoKey::parse("acme/").is_err());
    }

    #[test]
    fn new_rejects_embedded_slash() {
        assert!(RepoKey::new("acme", "wid/gets").is_err());
    }

    #[test]
    fn round_trips_through_display() {
        let key = RepoKey::new("tokio-rs", "tokio").unwrap();
        let parsed = RepoKey::parse(&key.to_string()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn serde_round_trip() {
        let key = RepoKey::parse("acme/widgets").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let back: RepoKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
