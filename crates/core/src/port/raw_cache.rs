// Raw Cache Port

use crate::domain::{CacheEntry, Cursor};
use crate::error::Result;
use async_trait::async_trait;

/// Append-only store of raw backend batches, keyed by `(repository, from_cursor)`
#[async_trait]
pub trait RawCache: Send + Sync {
    /// Entry starting after `from` (`None` = start of stream)
    async fn get(&self, repository_id: &str, from: Option<&Cursor>) -> Result<Option<CacheEntry>>;

    /// Store an entry unless one already exists for its key
    ///
    /// Returns `true` if the entry was inserted. Existing entries are never replaced.
    async fn put(&self, entry: &CacheEntry) -> Result<bool>;

    /// Drop every entry of a repository, returning how many were removed
    async fn clear(&self, repository_id: &str) -> Result<u64>;

    /// Number of entries held for a repository
    async fn count(&self, repository_id: &str) -> Result<i64>;
}

pub mod mocks {
    use super::*;
    use crate::domain::cursor_key;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory cache with the same idempotent-put semantics as the SQLite one
    #[derive(Default)]
    pub struct MemoryCache {
        entries: Mutex<BTreeMap<(String, String), CacheEntry>>,
    }

    impl MemoryCache {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RawCache for MemoryCache {
        async fn get(
            &self,
            repository_id: &str,
            from: Option<&Cursor>,
        ) -> Result<Option<CacheEntry>> {
            let key = (repository_id.to_string(), cursor_key(from).to_string());
            Ok(self.entries.lock().unwrap().get(&key).cloned())
        }

        async fn put(&self, entry: &CacheEntry) -> Result<bool> {
            let key = (
                entry.repository_id.clone(),
                cursor_key(entry.from_cursor.as_ref()).to_string(),
            );
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(&key) {
                return Ok(false);
            }
            entries.insert(key, entry.clone());
            Ok(true)
        }

        async fn clear(&self, repository_id: &str) -> Result<u64> {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|(repo, _), _| repo != repository_id);
            Ok((before - entries.len()) as u64)
        }

        async fn count(&self, repository_id: &str) -> Result<i64> {
            let entries = self.entries.lock().unwrap();
            Ok(entries.keys().filter(|(repo, _)| repo == repository_id).count() as i64)
        }
    }
}
