// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use async_trait::async_trait;
use quarry_core::domain::JobState;
use quarry_core::error::Result;
use quarry_core::port::{Maintenance, MaintenanceStats, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// DB size in bytes (page_count * page_size)
    async fn get_db_size_bytes(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(page_count * page_size)
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    fn cutoff(&self, retention_days: i64) -> i64 {
        self.time_provider.now_millis() - retention_days * DAY_MS
    }
}

fn to_mb(bytes: i64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let size_before = to_mb(self.get_db_size_bytes().await?);

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let size_after = to_mb(self.get_db_size_bytes().await?);
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn gc_terminal_jobs(&self, retention_days: i64) -> Result<i64> {
        let cutoff_time = self.cutoff(retention_days);

        info!(
            retention_days = retention_days,
            cutoff_time = cutoff_time,
            "Running terminal job GC"
        );

        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE state IN (?, ?)
            AND finished_at IS NOT NULL
            AND finished_at < ?
            AND id NOT IN (SELECT last_job_id FROM repositories WHERE last_job_id IS NOT NULL)
            "#,
        )
        .bind(JobState::Finished.to_string())
        .bind(JobState::Failed.to_string())
        .bind(cutoff_time)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_jobs = deleted, "Terminal job GC completed");
        Ok(deleted)
    }

    async fn gc_settled_messages(&self, retention_days: i64) -> Result<i64> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE state IN ('ACKED', 'FAILED')
            AND settled_at IS NOT NULL
            AND settled_at < ?
            "#,
        )
        .bind(self.cutoff(retention_days))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() as i64)
    }

    async fn gc_applied_reports(&self) -> Result<i64> {
        let result = sqlx::query("DELETE FROM job_reports WHERE applied_at IS NOT NULL")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() as i64)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let db_size_bytes = self.get_db_size_bytes().await?;

        Ok(MaintenanceStats {
            db_size_mb: to_mb(db_size_bytes),
            db_size_bytes,
            job_count: self.count("SELECT COUNT(*) FROM jobs").await?,
            terminal_job_count: self
                .count("SELECT COUNT(*) FROM jobs WHERE state IN ('FINISHED', 'FAILED')")
                .await?,
            queue_message_count: self.count("SELECT COUNT(*) FROM queue_messages").await?,
            cache_entry_count: self.count("SELECT COUNT(*) FROM raw_cache").await?,
            report_count: self.count("SELECT COUNT(*) FROM job_reports").await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteJobStore, SqliteRepositoryStore};
    use quarry_core::domain::{BackendArgs, BackendType, CachePolicy, Job, Repository};
    use quarry_core::port::time_provider::mocks::ManualClock;
    use quarry_core::port::{JobStore, RepositoryStore};

    const NOW: i64 = 100 * DAY_MS;

    async fn setup() -> (SqlitePool, SqliteMaintenance) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let maintenance = SqliteMaintenance::new(pool.clone(), Arc::new(ManualClock::new(NOW)));
        (pool, maintenance)
    }

    fn finished_job(id: &str, repo: &Repository, finished_at: i64) -> Job {
        let mut job = Job::new(id, finished_at - 10, repo, BackendArgs::new(), CachePolicy::Use);
        job.state = JobState::Finished;
        job.started_at = Some(finished_at - 5);
        job.finished_at = Some(finished_at);
        job
    }

    #[tokio::test]
    async fn test_maintenance_stats() {
        let (_pool, maintenance) = setup().await;
        let stats = maintenance.get_stats().await.unwrap();

        assert!(stats.db_size_mb > 0.0);
        assert_eq!(stats.job_count, 0);
        assert_eq!(stats.terminal_job_count, 0);
        assert_eq!(stats.cache_entry_count, 0);
    }

    #[tokio::test]
    async fn test_vacuum() {
        let (_pool, maintenance) = setup().await;
        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed >= 0.0);
    }

    #[tokio::test]
    async fn test_gc_keeps_last_job_of_repository() {
        let (pool, maintenance) = setup().await;
        let repos = SqliteRepositoryStore::new(pool.clone());
        let jobs = SqliteJobStore::new(pool);

        let mut repo =
            Repository::new("repo-A", BackendType::new("git"), BackendArgs::new(), true, 0)
                .unwrap();
        repo.last_job_id = Some("job-2".to_string());
        repos.insert(&repo).await.unwrap();

        let ten_days_ago = NOW - 10 * DAY_MS;
        jobs.insert(&finished_job("job-1", &repo, ten_days_ago)).await.unwrap();
        jobs.insert(&finished_job("job-2", &repo, ten_days_ago + 1)).await.unwrap();
        jobs.insert(&finished_job("job-3", &repo, NOW - 1)).await.unwrap();

        let deleted = maintenance.gc_terminal_jobs(7).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(jobs.find_by_id("job-1").await.unwrap().is_none());
        assert!(jobs.find_by_id("job-2").await.unwrap().is_some());
        assert!(jobs.find_by_id("job-3").await.unwrap().is_some());
    }
}
