// SQLite Raw Cache

use crate::error::{corrupt, map_sqlx_error};
use async_trait::async_trait;
use quarry_core::domain::{cursor_from_key, cursor_key, CacheEntry, Cursor};
use quarry_core::error::Result;
use quarry_core::port::RawCache;
use sqlx::SqlitePool;

pub struct SqliteRawCache {
    pool: SqlitePool,
}

impl SqliteRawCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    repository_id: String,
    from_cursor: String,
    next_cursor: String,
    payload: Vec<u8>,
    created_at: i64,
}

impl CacheRow {
    fn into_entry(self) -> Result<CacheEntry> {
        if self.next_cursor.is_empty() {
            return Err(corrupt("raw_cache", "empty next_cursor"));
        }
        Ok(CacheEntry {
            from_cursor: cursor_from_key(&self.from_cursor),
            next_cursor: Cursor::new(self.next_cursor),
            repository_id: self.repository_id,
            payload: self.payload,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl RawCache for SqliteRawCache {
    async fn get(&self, repository_id: &str, from: Option<&Cursor>) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT repository_id, from_cursor, next_cursor, payload, created_at
            FROM raw_cache
            WHERE repository_id = ? AND from_cursor = ?
            "#,
        )
        .bind(repository_id)
        .bind(cursor_key(from))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(CacheRow::into_entry).transpose()
    }

    async fn put(&self, entry: &CacheEntry) -> Result<bool> {
        // First writer wins; a replayed batch never overwrites the chain
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO raw_cache
                (repository_id, from_cursor, next_cursor, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.repository_id)
        .bind(cursor_key(entry.from_cursor.as_ref()))
        .bind(entry.next_cursor.as_str())
        .bind(&entry.payload)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear(&self, repository_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM raw_cache WHERE repository_id = ?")
            .bind(repository_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn count(&self, repository_id: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM raw_cache WHERE repository_id = ?")
            .bind(repository_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}
