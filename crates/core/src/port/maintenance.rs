// Store maintenance port
use crate::error::Result;
use async_trait::async_trait;

/// Store maintenance statistics
#[derive(Debug, Clone)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub job_count: i64,
    pub terminal_job_count: i64,
    pub queue_message_count: i64,
    pub cache_entry_count: i64,
    pub report_count: i64,
}

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Retention period for FINISHED/FAILED jobs and settled queue messages (days)
    pub job_retention_days: i64,

    /// Maximum DB size before forcing VACUUM (MB)
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            job_retention_days: 30,
            max_db_size_mb: 1000.0,
        }
    }
}

/// Store maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Delete terminal jobs older than the retention period
    ///
    /// A job still referenced as some repository's `last_job_id` is kept.
    ///
    /// # Returns
    /// Number of jobs deleted
    async fn gc_terminal_jobs(&self, retention_days: i64) -> Result<i64>;

    /// Delete ACKED/FAILED queue messages older than the retention period
    async fn gc_settled_messages(&self, retention_days: i64) -> Result<i64>;

    /// Delete reports the scheduler has already applied
    async fn gc_applied_reports(&self) -> Result<i64>;

    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Run full maintenance (GC + VACUUM when the store is large)
    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        let stats_before = self.get_stats().await?;

        let deleted_jobs = self.gc_terminal_jobs(config.job_retention_days).await?;
        let deleted_messages = self.gc_settled_messages(config.job_retention_days).await?;
        let deleted_reports = self.gc_applied_reports().await?;

        let reclaimed_mb = if stats_before.db_size_mb > config.max_db_size_mb {
            self.vacuum().await?
        } else {
            0.0
        };

        let stats_after = self.get_stats().await?;

        tracing::info!(
            deleted_jobs = deleted_jobs,
            deleted_messages = deleted_messages,
            deleted_reports = deleted_reports,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            "Maintenance completed"
        );

        Ok(stats_after)
    }
}
