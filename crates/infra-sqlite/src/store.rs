// One migrated pool handing out every adapter

use crate::{
    create_pool, run_migrations, SqliteJobQueue, SqliteJobStore, SqliteMaintenance,
    SqliteRawCache, SqliteReportChannel, SqliteRepositoryStore,
};
use quarry_core::error::Result;
use quarry_core::port::TimeProvider;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Shared SQLite store; every adapter built from it sees the same database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteStore {
    /// Connect and bring the schema up to date
    pub async fn open(database_url: &str, time_provider: Arc<dyn TimeProvider>) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        info!(database_url = %database_url, "SQLite store ready");
        Ok(Self {
            pool,
            time_provider,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn repositories(&self) -> SqliteRepositoryStore {
        SqliteRepositoryStore::new(self.pool.clone())
    }

    pub fn jobs(&self) -> SqliteJobStore {
        SqliteJobStore::new(self.pool.clone())
    }

    pub fn queue(&self) -> SqliteJobQueue {
        SqliteJobQueue::new(self.pool.clone(), self.time_provider.clone())
    }

    pub fn cache(&self) -> SqliteRawCache {
        SqliteRawCache::new(self.pool.clone())
    }

    pub fn reports(&self) -> SqliteReportChannel {
        SqliteReportChannel::new(self.pool.clone(), self.time_provider.clone())
    }

    pub fn maintenance(&self) -> SqliteMaintenance {
        SqliteMaintenance::new(self.pool.clone(), self.time_provider.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_url;
    use quarry_core::domain::{BackendArgs, BackendType, Repository};
    use quarry_core::port::{RepositoryStore, SystemTimeProvider};

    #[tokio::test]
    async fn test_adapters_share_one_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(&dir.path().join("quarry.db"));

        let store = SqliteStore::open(&url, Arc::new(SystemTimeProvider)).await.unwrap();
        let repo =
            Repository::new("repo-A", BackendType::new("git"), BackendArgs::new(), true, 0)
                .unwrap();
        store.repositories().insert(&repo).await.unwrap();
        store.close().await;

        // Reopening runs migrations again and keeps the data
        let reopened = SqliteStore::open(&url, Arc::new(SystemTimeProvider)).await.unwrap();
        assert_eq!(reopened.repositories().count().await.unwrap(), 1);
    }
}
