use super::StateStore;
use chrono::{DateTime, Utc};
use core::time::Duration;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

/// In-process [`StateStore`] backed by mutex-guarded maps.
///
/// Set-member TTLs are enforced lazily: expired members are discarded when the
/// containing set is next read or written.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Inner {
    kv: HashMap<String, String>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    zsets: HashMap<String, BTreeMap<String, i64>>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashMap<String, Option<DateTime<Utc>>>>,
}

impl Inner {
    /// Drop expired members from a set, if it exists.
    fn expire_set(&mut self, key: &str, now: DateTime<Utc>) {
        if let Some(set) = self.sets.get_mut(key) {
            set.retain(|_, expiry| expiry.is_none_or(|at| at > now));
        }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("lock not poisoned")
    }

    /// Serialize the full contents, for file-backed persistence.
    pub(super) fn export(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&*self.lock())?)
    }

    /// Replace the full contents from a prior [`export`](Self::export).
    pub(super) fn import(&self, raw: &str) -> crate::Result<()> {
        *self.lock() = serde_json::from_str(raw)?;
        Ok(())
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> crate::Result<Option<String>> {
        Ok(self.lock().kv.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> crate::Result<()> {
        let _ = self.lock().kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> crate::Result<()> {
        let mut inner = self.lock();
        let _ = inner.kv.remove(key);
        let _ = inner.hashes.remove(key);
        let _ = inner.zsets.remove(key);
        let _ = inner.lists.remove(key);
        let _ = inner.sets.remove(key);
        Ok(())
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> crate::Result<()> {
        let _ = self
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hget_all(&self, key: &str) -> crate::Result<Vec<(String, String)>> {
        Ok(self
            .lock()
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn zadd(&self, key: &str, member: &str, score: i64) -> crate::Result<()> {
        let _ = self
            .lock()
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    fn zrem(&self, key: &str, member: &str) -> crate::Result<()> {
        if let Some(zset) = self.lock().zsets.get_mut(key) {
            let _ = zset.remove(member);
        }
        Ok(())
    }

    fn zcard(&self, key: &str) -> crate::Result<u64> {
        Ok(self.lock().zsets.get(key).map(|z| z.len() as u64).unwrap_or_default())
    }

    fn zrange_by_score(&self, key: &str, min: i64, max: i64, limit: usize) -> crate::Result<Vec<String>> {
        let inner = self.lock();
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<(&String, i64)> = zset
            .iter()
            .filter(|&(_, &score)| score >= min && score <= max)
            .map(|(member, &score)| (member, score))
            .collect();
        matching.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        Ok(matching.into_iter().take(limit).map(|(member, _)| member.clone()).collect())
    }

    fn rpush(&self, key: &str, value: &str) -> crate::Result<()> {
        self.lock().lists.entry(key.to_string()).or_default().push_back(value.to_string());
        Ok(())
    }

    fn lpop(&self, key: &str) -> crate::Result<Option<String>> {
        Ok(self.lock().lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    fn llen(&self, key: &str) -> crate::Result<u64> {
        Ok(self.lock().lists.get(key).map(|l| l.len() as u64).unwrap_or_default())
    }

    fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> crate::Result<()> {
        let now = Utc::now();
        let expiry = ttl.and_then(|d| chrono::Duration::from_std(d).ok()).map(|d| now + d);

        let mut inner = self.lock();
        inner.expire_set(key, now);
        let _ = inner.sets.entry(key.to_string()).or_default().insert(member.to_string(), expiry);
        Ok(())
    }

    fn sismember(&self, key: &str, member: &str) -> crate::Result<bool> {
        let now = Utc::now();
        let mut inner = self.lock();
        inner.expire_set(key, now);
        Ok(inner.sets.get(key).is_some_and(|set| set.contains_key(member)))
    }

    fn srem(&self, key: &str, member: &str) -> crate::Result<()> {
        if let Some(set) = self.lock().sets.get_mut(key) {
            let _ = set.remove(member);
        }
        Ok(())
    }

    fn smembers(&self, key: &str) -> crate::Result<Vec<String>> {
        let now = Utc::now();
        let mut inner = self.lock();
        inner.expire_set(key, now);

        let mut members: Vec<String> = inner.sets.get(key).map(|set| set.keys().cloned().collect()).unwrap_or_default();
        members.sort();
        Ok(members)
    }

    fn scard(&self, key: &str) -> crate::Result<u64> {
        let now = Utc::now();
        let mut inner = self.lock();
        inner.expire_set(key, now);
        Ok(inner.sets.get(key).map(|set| set.len() as u64).unwrap_or_default())
    }
}
