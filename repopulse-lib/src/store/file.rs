use super::{MemoryStore, StateStore};
use core::time::Duration;
use ohno::IntoAppError;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "     store";

/// [`StateStore`] persisted to a single JSON file.
///
/// Reads are served from memory; every mutation rewrites the file. That is
/// plenty for a single-process CLI workload, which is the consistency model
/// the pipeline assumes anyway. A corrupt or missing file starts empty.
pub struct FileStore {
    memory: MemoryStore,
    path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let memory = MemoryStore::new();

        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                if let Err(e) = memory.import(&raw) {
                    log::warn!(target: LOG_TARGET, "Store file '{}' is corrupt, starting empty: {e}", path.display());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).into_app_err_with(|| format!("reading store file '{}'", path.display())),
        }

        Ok(Self { memory, path })
    }

    fn persist(&self) -> crate::Result<()> {
        let raw = self.memory.export()?;
        std::fs::write(&self.path, raw).into_app_err_with(|| format!("writing store file '{}'", self.path.display()))
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> crate::Result<Option<String>> {
        self.memory.get(key)
    }

    fn set(&self, key: &str, value: &str) -> crate::Result<()> {
        self.memory.set(key, value)?;
        self.persist()
    }

    fn delete(&self, key: &str) -> crate::Result<()> {
        self.memory.delete(key)?;
        self.persist()
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> crate::Result<()> {
        self.memory.hset(key, field, value)?;
        self.persist()
    }

    fn hget_all(&self, key: &str) -> crate::Result<Vec<(String, String)>> {
        self.memory.hget_all(key)
    }

    fn zadd(&self, key: &str, member: &str, score: i64) -> crate::Result<()> {
        self.memory.zadd(key, member, score)?;
        self.persist()
    }

    fn zrem(&self, key: &str, member: &str) -> crate::Result<()> {
        self.memory.zrem(key, member)?;
        self.persist()
    }

    fn zcard(&self, key: &str) -> crate::Result<u64> {
        self.memory.zcard(key)
    }

    fn zrange_by_score(&self, key: &str, min: i64, max: i64, limit: usize) -> crate::Result<Vec<String>> {
        self.memory.zrange_by_score(key, min, max, limit)
    }

    fn rpush(&self, key: &str, value: &str) -> crate::Result<()> {
        self.memory.rpush(key, value)?;
        self.persist()
    }

    fn lpop(&self, key: &str) -> crate::Result<Option<String>> {
        let value = self.memory.lpop(key)?;
        if value.is_some() {
            self.persist()?;
        }
        Ok(value)
    }

    fn llen(&self, key: &str) -> crate::Result<u64> {
        self.memory.llen(key)
    }

    fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> crate::Result<()> {
        self.memory.sadd(key, member, ttl)?;
        self.persist()
    }

    fn sismember(&self, key: &str, member: &str) -> crate::Result<bool> {
        self.memory.sismember(key, member)
    }

    fn srem(&self, key: &str, member: &str) -> crate::Result<()> {
        self.memory.srem(key, member)?;
        self.persist()
    }

    fn smembers(&self, key: &str) -> crate::Result<Vec<String>> {
        self.memory.smembers(key)
    }

    fn scard(&self, key: &str) -> crate::Result<u64> {
        self.memory.scard(key)
    }
}
