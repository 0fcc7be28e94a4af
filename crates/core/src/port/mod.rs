// Port Layer - Interfaces for external dependencies

pub mod backend;
pub mod id_provider; // For deterministic testing
pub mod job_queue;
pub mod job_store;
pub mod maintenance;
pub mod raw_cache;
pub mod reporting;
pub mod repository_store;
pub mod time_provider;
pub mod transaction;
pub mod writer;

// Re-exports
pub use backend::{Backend, BackendError, BackendFactory};
pub use id_provider::{IdProvider, UuidProvider};
pub use job_queue::JobQueue;
pub use job_store::JobStore;
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use raw_cache::RawCache;
pub use reporting::{PendingReport, ReportSink, ReportSource};
pub use repository_store::RepositoryStore;
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use transaction::{SchedulingTransaction, Transaction, TransactionalStore};
pub use writer::{ItemWriter, WriterError};
