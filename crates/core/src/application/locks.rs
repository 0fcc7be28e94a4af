// Per-repository async locks (in-process serialization of scheduler mutations)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per repository id, created on demand
#[derive(Default)]
pub struct RepositoryLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RepositoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `repository_id`
    pub async fn acquire(&self, repository_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(repository_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Drop the entry of an unregistered repository
    pub fn forget(&self, repository_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(repository_id) {
            // Only when nobody else holds or waits on it
            if Arc::strong_count(lock) == 1 {
                locks.remove(repository_id);
            }
        }
    }
}
