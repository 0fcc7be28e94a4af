// SQLite Scheduling Transaction

use crate::error::map_sqlx_error;
use crate::job_store::{insert_job, update_job};
use crate::rows::cursor_column;
use async_trait::async_trait;
use quarry_core::domain::{Cursor, Job};
use quarry_core::error::Result;
use quarry_core::port::{SchedulingTransaction, Transaction};
use sqlx::{Sqlite, Transaction as SqlxTransaction};

/// Busy-lock claim/release plus job writes on one SQLite transaction
///
/// Every scheduler transaction starts with a write, so SQLite takes the write lock
/// up front instead of failing a read-to-write upgrade under contention.
pub struct SqliteSchedulingTransaction {
    tx: SqlxTransaction<'static, Sqlite>,
}

impl SqliteSchedulingTransaction {
    pub fn new(tx: SqlxTransaction<'static, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteSchedulingTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl SchedulingTransaction for SqliteSchedulingTransaction {
    async fn claim_repository(
        &mut self,
        repository_id: &str,
        job_id: &str,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE repositories
            SET active_job_id = ?, last_job_id = ?, next_update_at = NULL, updated_at = ?
            WHERE id = ? AND active_job_id IS NULL
            "#,
        )
        .bind(job_id)
        .bind(job_id)
        .bind(now)
        .bind(repository_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_job(&mut self, job: &Job) -> Result<()> {
        insert_job(&mut *self.tx, job).await
    }

    async fn update_job(&mut self, job: &Job) -> Result<()> {
        update_job(&mut *self.tx, job).await
    }

    async fn release_repository(
        &mut self,
        repository_id: &str,
        job_id: &str,
        cursor: Option<&Cursor>,
        next_update_at: Option<i64>,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE repositories
            SET active_job_id = NULL, cursor = ?, next_update_at = ?, updated_at = ?
            WHERE id = ? AND active_job_id = ?
            "#,
        )
        .bind(cursor_column(cursor))
        .bind(next_update_at)
        .bind(now)
        .bind(repository_id)
        .bind(job_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}
