// Repository Store Port (Interface)

use crate::domain::{Repository, RepositoryId};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence for registered repositories
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Insert a new repository
    ///
    /// # Errors
    /// - `AppError::DuplicateRepository` if the identity is already registered
    async fn insert(&self, repository: &Repository) -> Result<()>;

    /// Find repository by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Repository>>;

    /// All repositories, ordered by registration time
    async fn list(&self) -> Result<Vec<Repository>>;

    /// Update repository
    async fn update(&self, repository: &Repository) -> Result<()>;

    /// Delete the repository unless a job holds its busy-lock
    ///
    /// Returns `false` if nothing was deleted (absent or busy).
    async fn delete_if_idle(&self, id: &str) -> Result<bool>;

    /// Idle repositories whose continuous update is due at `now`, most overdue first
    async fn find_due_updates(&self, now: i64) -> Result<Vec<RepositoryId>>;

    /// Number of registered repositories
    async fn count(&self) -> Result<i64>;
}
