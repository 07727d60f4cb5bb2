//! Persistent state store abstraction.
//!
//! The pipeline treats its backing store as an external collaborator reached
//! through the [`StateStore`] trait: plain keyed values, hashes, ordered sets
//! (used for the retry/failure indices), lists (the webhook FIFO), and sets
//! with optional per-member TTL (processed-event dedup).
//!
//! [`MemoryStore`] is the in-process implementation used by tests;
//! [`FileStore`] persists the same structures to a JSON file for the CLI. A
//! networked backend only needs to implement the same trait.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use core::time::Duration;
use serde::Serialize;
use serde::de::DeserializeOwned;

const LOG_TARGET: &str = "     store";

/// Keyed storage consumed by the collection pipeline.
///
/// All operations are scoped to a single key and follow read-modify-write;
/// last-writer-wins is the accepted consistency model (one writer per
/// repository is assumed).
pub trait StateStore: Send + Sync {
    // Plain key/value

    fn get(&self, key: &str) -> crate::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> crate::Result<()>;
    fn delete(&self, key: &str) -> crate::Result<()>;

    // Hashes

    fn hset(&self, key: &str, field: &str, value: &str) -> crate::Result<()>;
    fn hget_all(&self, key: &str) -> crate::Result<Vec<(String, String)>>;

    // Ordered sets (score-indexed)

    fn zadd(&self, key: &str, member: &str, score: i64) -> crate::Result<()>;
    fn zrem(&self, key: &str, member: &str) -> crate::Result<()>;
    fn zcard(&self, key: &str) -> crate::Result<u64>;

    /// Members with `min <= score <= max`, ordered by ascending score, at most `limit`.
    fn zrange_by_score(&self, key: &str, min: i64, max: i64, limit: usize) -> crate::Result<Vec<String>>;

    // Lists (FIFO via rpush + lpop)

    fn rpush(&self, key: &str, value: &str) -> crate::Result<()>;
    fn lpop(&self, key: &str) -> crate::Result<Option<String>>;
    fn llen(&self, key: &str) -> crate::Result<u64>;

    // Sets with optional per-member TTL

    fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> crate::Result<()>;
    fn sismember(&self, key: &str, member: &str) -> crate::Result<bool>;
    fn srem(&self, key: &str, member: &str) -> crate::Result<()>;
    fn smembers(&self, key: &str) -> crate::Result<Vec<String>>;
    fn scard(&self, key: &str) -> crate::Result<u64>;
}

/// Load and deserialize a JSON record.
///
/// A record that exists but fails to deserialize is treated as absent: the
/// pipeline resets corrupt state to defaults instead of propagating a fatal
/// error.
pub fn get_json<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> crate::Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            log::warn!(target: LOG_TARGET, "Corrupt record at '{key}', treating as absent: {e}");
            Ok(None)
        }
    }
}

/// Serialize and store a JSON record.
pub fn set_json<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) -> crate::Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// Key scheme shared by every component that touches the store.
pub mod keys {
    use crate::collect::RepoKey;

    /// Per-repository collection state record.
    #[must_use]
    pub fn state(repo: &RepoKey) -> String {
        format!("state:{repo}")
    }

    /// Per-repository activity snapshot.
    #[must_use]
    pub fn snapshot(repo: &RepoKey) -> String {
        format!("snapshot:{repo}")
    }

    /// Per-repository derived metrics (latest computation).
    #[must_use]
    pub fn metrics(repo: &RepoKey) -> String {
        format!("metrics:{repo}")
    }

    /// Ordered set of repositories awaiting retry, scored by `next_retry_at`.
    pub const RETRY_INDEX: &str = "idx:retries";

    /// Ordered set of repositories with failed sources, scored by `last_attempt_at`.
    pub const FAILURE_INDEX: &str = "idx:failures";

    /// FIFO queue of pending webhook events.
    pub const WEBHOOK_QUEUE: &str = "webhooks:queue";

    /// Processed webhook event ids (TTL-bounded membership).
    pub const WEBHOOK_SEEN: &str = "webhooks:seen";

    /// Hash of webhook processing errors keyed by event id.
    pub const WEBHOOK_ERRORS: &str = "webhooks:errors";

    /// Set of approved repositories covered by the fleet refresh.
    pub const APPROVED: &str = "repos:approved";
}
