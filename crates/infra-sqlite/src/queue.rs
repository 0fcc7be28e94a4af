// SQLite Job Queue (durable, leased)

use crate::error::{corrupt, map_sqlx_error};
use crate::rows::cursor_column;
use async_trait::async_trait;
use quarry_core::domain::{
    Cursor, LeasedMessage, Progress, QueueMessage, QueueMessageId,
};
use quarry_core::error::Result;
use quarry_core::port::{JobQueue, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

const READY: &str = "READY";
const LEASED: &str = "LEASED";
const ACKED: &str = "ACKED";
const FAILED: &str = "FAILED";

/// Queue on the shared SQLite store; every process on the host sees the same rows
pub struct SqliteJobQueue {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LeasedRow {
    id: i64,
    queue: String,
    body: String,
    resume_cursor: Option<String>,
    items_written: i64,
    batches_written: i64,
    cache_hits: i64,
    deliveries: i64,
    lease_owner: Option<String>,
    lease_expires_at: Option<i64>,
}

impl LeasedRow {
    fn into_leased(self) -> Result<LeasedMessage> {
        let mut message: QueueMessage =
            serde_json::from_str(&self.body).map_err(|e| corrupt("queue message", e))?;
        // The column carries the latest checkpoint; the body keeps the enqueue-time cursor
        message.resume_cursor = self.resume_cursor.map(Cursor::new);

        Ok(LeasedMessage {
            id: self.id,
            queue: self.queue,
            progress: Progress {
                cursor: message.resume_cursor.clone(),
                items_written: self.items_written,
                batches_written: self.batches_written,
                cache_hits: self.cache_hits,
            },
            message,
            deliveries: self.deliveries,
            lease_owner: self.lease_owner.unwrap_or_default(),
            lease_expires_at: self.lease_expires_at.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, message: &QueueMessage) -> Result<QueueMessageId> {
        let start = Progress::starting_at(message.resume_cursor.clone());
        self.enqueue_resumed(message, &start).await
    }

    async fn enqueue_resumed(
        &self,
        message: &QueueMessage,
        progress: &Progress,
    ) -> Result<QueueMessageId> {
        let now = self.time_provider.now_millis();
        let body = serde_json::to_string(message)?;

        let result = sqlx::query(
            r#"
            INSERT INTO queue_messages (
                queue, job_id, body, resume_cursor,
                items_written, batches_written, cache_hits, state, enqueued_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.queue())
        .bind(&message.job_id)
        .bind(body)
        .bind(cursor_column(message.resume_cursor.as_ref()))
        .bind(progress.items_written)
        .bind(progress.batches_written)
        .bind(progress.cache_hits)
        .bind(READY)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn dequeue(
        &self,
        queue: &str,
        owner: &str,
        lease_ms: i64,
    ) -> Result<Option<LeasedMessage>> {
        let now = self.time_provider.now_millis();

        // Single statement: select-and-lease is atomic across processes
        let row = sqlx::query_as::<_, LeasedRow>(
            r#"
            UPDATE queue_messages
            SET state = ?, lease_owner = ?, lease_expires_at = ?, deliveries = deliveries + 1
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue = ?
                  AND (state = ? OR (state = ? AND lease_expires_at <= ?))
                ORDER BY id ASC
                LIMIT 1
            )
            RETURNING id, queue, body, resume_cursor, items_written, batches_written,
                      cache_hits, deliveries, lease_owner, lease_expires_at
            "#,
        )
        .bind(LEASED)
        .bind(owner)
        .bind(now + lease_ms)
        .bind(queue)
        .bind(READY)
        .bind(LEASED)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let leased = row.into_leased()?;
                debug!(
                    message_id = leased.id,
                    job_id = %leased.message.job_id,
                    owner = %owner,
                    deliveries = leased.deliveries,
                    "Message leased"
                );
                Ok(Some(leased))
            }
            None => Ok(None),
        }
    }

    async fn checkpoint(
        &self,
        id: QueueMessageId,
        owner: &str,
        progress: &Progress,
        lease_ms: i64,
    ) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET resume_cursor = ?, items_written = ?, batches_written = ?, cache_hits = ?,
                lease_expires_at = ?
            WHERE id = ? AND state = ? AND lease_owner = ?
            "#,
        )
        .bind(cursor_column(progress.cursor.as_ref()))
        .bind(progress.items_written)
        .bind(progress.batches_written)
        .bind(progress.cache_hits)
        .bind(now + lease_ms)
        .bind(id)
        .bind(LEASED)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn ack(&self, id: QueueMessageId, owner: &str) -> Result<bool> {
        self.settle(id, owner, ACKED, None).await
    }

    async fn fail(&self, id: QueueMessageId, owner: &str, reason: &str) -> Result<bool> {
        self.settle(id, owner, FAILED, Some(reason)).await
    }

    async fn revoke(&self, job_id: &str) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = ?, error = 'revoked', settled_at = ?
            WHERE job_id = ? AND state = ?
            "#,
        )
        .bind(FAILED)
        .bind(now)
        .bind(job_id)
        .bind(READY)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn settle_job(&self, job_id: &str, failure: Option<&str>) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let state = if failure.is_some() { FAILED } else { ACKED };
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = ?, error = ?, settled_at = ?
            WHERE job_id = ? AND state IN (?, ?)
            "#,
        )
        .bind(state)
        .bind(failure)
        .bind(now)
        .bind(job_id)
        .bind(READY)
        .bind(LEASED)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn depth(&self, queue: &str) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ? AND state IN (?, ?)",
        )
        .bind(queue)
        .bind(READY)
        .bind(LEASED)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn has_live_message(&self, job_id: &str) -> Result<bool> {
        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_messages WHERE job_id = ? AND state IN (?, ?)",
        )
        .bind(job_id)
        .bind(READY)
        .bind(LEASED)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(live > 0)
    }
}

impl SqliteJobQueue {
    async fn settle(
        &self,
        id: QueueMessageId,
        owner: &str,
        state: &str,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = ?, error = ?, settled_at = ?
            WHERE id = ? AND state = ? AND lease_owner = ?
            "#,
        )
        .bind(state)
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(LEASED)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use quarry_core::domain::{BackendArgs, BackendType, CachePolicy};
    use quarry_core::port::time_provider::mocks::ManualClock;

    async fn setup() -> (SqliteJobQueue, Arc<ManualClock>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        (SqliteJobQueue::new(pool, clock.clone()), clock)
    }

    fn message(job_id: &str, backend: &str) -> QueueMessage {
        QueueMessage {
            job_id: job_id.to_string(),
            repository_id: format!("repo-{}", job_id),
            backend: BackendType::new(backend),
            backend_args: BackendArgs::new(),
            cache_policy: CachePolicy::Use,
            resume_cursor: None,
        }
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let (queue, _clock) = setup().await;
        queue.enqueue(&message("job-1", "git")).await.unwrap();
        queue.enqueue(&message("job-2", "git")).await.unwrap();

        let first = queue.dequeue("git", "w1", 1_000).await.unwrap().unwrap();
        let second = queue.dequeue("git", "w2", 1_000).await.unwrap().unwrap();

        assert_eq!(first.message.job_id, "job-1");
        assert_eq!(second.message.job_id, "job-2");
        assert!(queue.dequeue("git", "w3", 1_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resumed_message_carries_progress() {
        let (queue, _clock) = setup().await;
        let mut resumed = message("job-1", "git");
        resumed.resume_cursor = Some(Cursor::new("c2"));
        let mut progress = Progress::starting_at(None);
        progress.advance(Cursor::new("c1"), 3, true);
        progress.advance(Cursor::new("c2"), 4, false);
        queue.enqueue_resumed(&resumed, &progress).await.unwrap();

        let leased = queue.dequeue("git", "w1", 1_000).await.unwrap().unwrap();
        assert_eq!(leased.message.resume_cursor, Some(Cursor::new("c2")));
        assert_eq!(leased.progress, progress);
        assert_eq!(leased.deliveries, 1);
    }

    #[tokio::test]
    async fn test_queues_are_separate() {
        let (queue, _clock) = setup().await;
        queue.enqueue(&message("job-1", "http")).await.unwrap();

        assert!(queue.dequeue("git", "w1", 1_000).await.unwrap().is_none());
        assert_eq!(queue.depth("http").await.unwrap(), 1);
        assert_eq!(queue.depth("git").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered_with_checkpoint() {
        let (queue, clock) = setup().await;
        queue.enqueue(&message("job-1", "git")).await.unwrap();

        let leased = queue.dequeue("git", "w1", 1_000).await.unwrap().unwrap();
        let progress = Progress {
            cursor: Some(Cursor::new("c1")),
            items_written: 3,
            batches_written: 1,
            cache_hits: 0,
        };
        assert!(queue.checkpoint(leased.id, "w1", &progress, 1_000).await.unwrap());

        // Still leased: nobody else gets it
        assert!(queue.dequeue("git", "w2", 1_000).await.unwrap().is_none());

        clock.advance(1_001);
        let redelivered = queue.dequeue("git", "w2", 1_000).await.unwrap().unwrap();
        assert_eq!(redelivered.id, leased.id);
        assert_eq!(redelivered.deliveries, 2);
        assert!(redelivered.is_redelivery());
        assert_eq!(redelivered.message.resume_cursor, Some(Cursor::new("c1")));
        assert_eq!(redelivered.progress, progress);

        // The first owner lost the lease
        assert!(!queue.checkpoint(leased.id, "w1", &progress, 1_000).await.unwrap());
        assert!(!queue.ack(leased.id, "w1").await.unwrap());
        assert!(queue.ack(leased.id, "w2").await.unwrap());
        assert_eq!(queue.depth("git").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_message_is_not_redelivered() {
        let (queue, clock) = setup().await;
        queue.enqueue(&message("job-1", "git")).await.unwrap();
        let leased = queue.dequeue("git", "w1", 1_000).await.unwrap().unwrap();

        assert!(queue.fail(leased.id, "w1", "writer refused").await.unwrap());
        clock.advance(10_000);
        assert!(queue.dequeue("git", "w1", 1_000).await.unwrap().is_none());
        assert!(!queue.has_live_message("job-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_only_unleased() {
        let (queue, _clock) = setup().await;
        queue.enqueue(&message("job-1", "git")).await.unwrap();
        queue.enqueue(&message("job-2", "git")).await.unwrap();
        queue.dequeue("git", "w1", 1_000).await.unwrap().unwrap();

        assert!(!queue.revoke("job-1").await.unwrap());
        assert!(queue.revoke("job-2").await.unwrap());
        assert!(!queue.has_live_message("job-2").await.unwrap());
        assert!(queue.has_live_message("job-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_settle_job_closes_leased_and_ready_messages() {
        let (queue, clock) = setup().await;
        queue.enqueue(&message("job-1", "git")).await.unwrap();
        let leased = queue.dequeue("git", "w1", 1_000).await.unwrap().unwrap();
        queue.enqueue(&message("job-1", "git")).await.unwrap();
        queue.enqueue(&message("job-2", "git")).await.unwrap();

        assert_eq!(queue.settle_job("job-1", None).await.unwrap(), 2);
        assert!(!queue.has_live_message("job-1").await.unwrap());
        assert!(!queue.ack(leased.id, "w1").await.unwrap());

        // Past the lease only the other job is delivered
        clock.advance(5_000);
        let next = queue.dequeue("git", "w2", 1_000).await.unwrap().unwrap();
        assert_eq!(next.message.job_id, "job-2");
        assert!(queue.dequeue("git", "w2", 1_000).await.unwrap().is_none());

        assert_eq!(queue.settle_job("job-2", Some("cancelled")).await.unwrap(), 1);
        assert_eq!(queue.settle_job("job-2", Some("cancelled")).await.unwrap(), 0);
    }
}
