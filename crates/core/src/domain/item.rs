// Items, raw batches and cache entries

use crate::domain::cursor::Cursor;
use crate::domain::repository::RepositoryId;
use serde::{Deserialize, Serialize};

/// Decoded unit of data handed to the writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identity within the repository (commit hash, issue number, ...)
    pub id: String,
    pub data: serde_json::Value,
}

impl Item {
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Undecoded page fetched from a backend, ending at `next`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    pub next: Cursor,
    pub payload: Vec<u8>,
}

impl RawBatch {
    pub fn new(next: Cursor, payload: Vec<u8>) -> Self {
        Self { next, payload }
    }
}

/// Cached raw batch, keyed by `(repository_id, from_cursor)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub repository_id: RepositoryId,

    /// Cursor the batch starts after (`None` = start of stream)
    pub from_cursor: Option<Cursor>,
    pub next_cursor: Cursor,
    pub payload: Vec<u8>,
    pub created_at: i64,
}

impl CacheEntry {
    pub fn from_batch(
        repository_id: impl Into<String>,
        from_cursor: Option<Cursor>,
        batch: &RawBatch,
        created_at: i64,
    ) -> Self {
        Self {
            repository_id: repository_id.into(),
            from_cursor,
            next_cursor: batch.next.clone(),
            payload: batch.payload.clone(),
            created_at,
        }
    }

    pub fn to_batch(&self) -> RawBatch {
        RawBatch::new(self.next_cursor.clone(), self.payload.clone())
    }
}
