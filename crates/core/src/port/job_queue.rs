// Job Queue Port (durable, leased, one queue per backend type)

use crate::domain::{LeasedMessage, Progress, QueueMessage, QueueMessageId};
use crate::error::Result;
use async_trait::async_trait;

/// Durable multi-producer / multi-consumer work queue
///
/// Messages move `READY → LEASED → {ACKED, FAILED}`. A LEASED message whose lease
/// has expired is READY again, so delivery is at-least-once.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a message to the queue named after its backend type
    async fn enqueue(&self, message: &QueueMessage) -> Result<QueueMessageId>;

    /// Enqueue a job that already made progress; redelivery continues its counters
    ///
    /// `progress.cursor` must equal `message.resume_cursor`.
    async fn enqueue_resumed(
        &self,
        message: &QueueMessage,
        progress: &Progress,
    ) -> Result<QueueMessageId>;

    /// Atomically pop the oldest deliverable message and lease it to `owner`
    ///
    /// Returns `None` when the queue is empty. Blocking is the caller's loop.
    async fn dequeue(
        &self,
        queue: &str,
        owner: &str,
        lease_ms: i64,
    ) -> Result<Option<LeasedMessage>>;

    /// Store the resume cursor (and counters) in the leased message and renew the lease
    ///
    /// Returns `false` if `owner` no longer holds the lease.
    async fn checkpoint(
        &self,
        id: QueueMessageId,
        owner: &str,
        progress: &Progress,
        lease_ms: i64,
    ) -> Result<bool>;

    /// Acknowledge successful processing
    async fn ack(&self, id: QueueMessageId, owner: &str) -> Result<bool>;

    /// Mark the message failed; it is never delivered again
    async fn fail(&self, id: QueueMessageId, owner: &str, reason: &str) -> Result<bool>;

    /// Remove a job's message if no worker has leased it yet
    async fn revoke(&self, job_id: &str) -> Result<bool>;

    /// Settle every READY or LEASED message of a job that reached a terminal state,
    /// whoever holds the lease
    ///
    /// `failure` of `None` acks, otherwise the messages are failed with that reason.
    /// Returns how many messages were settled.
    async fn settle_job(&self, job_id: &str, failure: Option<&str>) -> Result<u64>;

    /// READY + LEASED messages in `queue`
    async fn depth(&self, queue: &str) -> Result<i64>;

    /// Whether the job still has a READY or LEASED message
    async fn has_live_message(&self, job_id: &str) -> Result<bool>;
}
