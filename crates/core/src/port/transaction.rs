// Transaction port for atomic operations

use crate::domain::{Cursor, Job};
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Stores that can open a scheduling transaction
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn SchedulingTransaction>>;
}

/// Repository busy-lock and job writes that must land together
#[async_trait]
pub trait SchedulingTransaction: Transaction {
    /// Set `active_job_id` if the repository is idle, clearing any pending update
    ///
    /// Returns `false` if the repository is absent or already busy.
    async fn claim_repository(&mut self, repository_id: &str, job_id: &str, now: i64)
        -> Result<bool>;

    /// Insert job (within transaction)
    async fn insert_job(&mut self, job: &Job) -> Result<()>;

    /// Update job (within transaction)
    async fn update_job(&mut self, job: &Job) -> Result<()>;

    /// Clear the busy-lock held by `job_id`, store the repository cursor and the
    /// due time of its next continuous update
    ///
    /// Returns `false` if the lock was not held by that job.
    async fn release_repository(
        &mut self,
        repository_id: &str,
        job_id: &str,
        cursor: Option<&Cursor>,
        next_update_at: Option<i64>,
        now: i64,
    ) -> Result<bool>;
}
