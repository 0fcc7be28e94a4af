// Domain Layer - Pure business logic and entities

pub mod cursor;
pub mod error;
pub mod item;
pub mod job;
pub mod queue;
pub mod report;
pub mod repository;

// Re-exports
pub use cursor::{cursor_from_key, cursor_key, CachePolicy, Cursor};
pub use error::DomainError;
pub use item::{CacheEntry, Item, RawBatch};
pub use job::{Job, JobId, JobState};
pub use queue::{LeasedMessage, QueueId, QueueMessage, QueueMessageId};
pub use report::{Failure, FailureKind, JobOutcome, JobReport, Progress, WorkerPhase};
pub use repository::{BackendArgs, BackendType, Repository, RepositoryId};
