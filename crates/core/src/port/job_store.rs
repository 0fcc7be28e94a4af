// Job Store Port (Interface)

use crate::domain::{Job, JobState};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence for job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// Update job
    async fn update(&self, job: &Job) -> Result<()>;

    /// Jobs of one repository, newest first
    async fn list_for_repository(&self, repository_id: &str, limit: i64) -> Result<Vec<Job>>;

    /// Find all jobs by state (for recovery)
    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    /// Count jobs by state
    async fn count_by_state(&self, state: JobState) -> Result<i64>;
}
