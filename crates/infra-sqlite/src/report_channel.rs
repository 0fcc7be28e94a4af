// Durable worker -> scheduler report channel

use crate::error::{corrupt, map_sqlx_error};
use async_trait::async_trait;
use quarry_core::domain::JobReport;
use quarry_core::error::Result;
use quarry_core::port::{PendingReport, ReportSink, ReportSource, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Reports written by standalone workers and applied by the scheduler process
pub struct SqliteReportChannel {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteReportChannel {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl ReportSink for SqliteReportChannel {
    async fn report(&self, report: JobReport) -> Result<()> {
        let body = serde_json::to_string(&report)?;
        sqlx::query("INSERT INTO job_reports (job_id, body, recorded_at) VALUES (?, ?, ?)")
            .bind(report.job_id())
            .bind(body)
            .bind(self.time_provider.now_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl ReportSource for SqliteReportChannel {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<PendingReport>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, body FROM job_reports WHERE applied_at IS NULL ORDER BY id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|(id, body)| {
                let report: JobReport =
                    serde_json::from_str(&body).map_err(|e| corrupt("job_report", e))?;
                Ok(PendingReport { id, report })
            })
            .collect()
    }

    async fn mark_applied(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE job_reports SET applied_at = ? WHERE id = ?")
            .bind(self.time_provider.now_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use quarry_core::domain::Progress;
    use quarry_core::port::time_provider::mocks::ManualClock;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_reports_are_delivered_in_order_until_applied() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let channel = SqliteReportChannel::new(pool, Arc::new(ManualClock::new(5_000)));

        channel
            .report(JobReport::Started {
                job_id: "job-1".to_string(),
                worker_id: "w-1".to_string(),
            })
            .await
            .unwrap();
        channel
            .report(JobReport::Progress {
                job_id: "job-1".to_string(),
                progress: Progress::starting_at(None),
            })
            .await
            .unwrap();

        let pending = channel.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(matches!(pending[0].report, JobReport::Started { .. }));
        assert!(matches!(pending[1].report, JobReport::Progress { .. }));

        assert_ok!(channel.mark_applied(pending[0].id).await);
        let remaining = channel.fetch_pending(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, pending[1].id);
    }
}
