// SQLite RepositoryStore Implementation

use crate::error::{is_unique_violation, map_sqlx_error};
use crate::rows::{args_json, cursor_column, RepositoryRow};
use async_trait::async_trait;
use quarry_core::domain::Repository;
use quarry_core::error::{AppError, Result};
use quarry_core::port::RepositoryStore;
use sqlx::SqlitePool;

pub struct SqliteRepositoryStore {
    pool: SqlitePool,
}

impl SqliteRepositoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryStore for SqliteRepositoryStore {
    async fn insert(&self, repository: &Repository) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repositories (
                id, backend, backend_args, cache_enabled, cursor, active_job_id,
                last_job_id, update_interval_ms, next_update_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&repository.id)
        .bind(repository.backend.as_str())
        .bind(args_json(&repository.backend_args))
        .bind(repository.cache_enabled)
        .bind(cursor_column(repository.cursor.as_ref()))
        .bind(&repository.active_job_id)
        .bind(&repository.last_job_id)
        .bind(repository.update_interval_ms)
        .bind(repository.next_update_at)
        .bind(repository.created_at)
        .bind(repository.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::DuplicateRepository(repository.id.clone())
            } else {
                map_sqlx_error(e)
            }
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Repository>> {
        let row = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(RepositoryRow::into_repository).transpose()
    }

    async fn list(&self) -> Result<Vec<Repository>> {
        let rows: Vec<RepositoryRow> =
            sqlx::query_as("SELECT * FROM repositories ORDER BY created_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(RepositoryRow::into_repository).collect()
    }

    async fn update(&self, repository: &Repository) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE repositories
            SET backend_args = ?, cache_enabled = ?, cursor = ?, active_job_id = ?,
                last_job_id = ?, update_interval_ms = ?, next_update_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(args_json(&repository.backend_args))
        .bind(repository.cache_enabled)
        .bind(cursor_column(repository.cursor.as_ref()))
        .bind(&repository.active_job_id)
        .bind(&repository.last_job_id)
        .bind(repository.update_interval_ms)
        .bind(repository.next_update_at)
        .bind(repository.updated_at)
        .bind(&repository.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("repository {}", repository.id)));
        }
        Ok(())
    }

    async fn delete_if_idle(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE id = ? AND active_job_id IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_due_updates(&self, now: i64) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM repositories
            WHERE next_update_at IS NOT NULL AND next_update_at <= ? AND active_job_id IS NULL
            ORDER BY next_update_at ASC, id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM repositories")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}
