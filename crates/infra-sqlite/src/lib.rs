// Quarry Infrastructure - SQLite Adapter
// Implements: RepositoryStore, JobStore, TransactionalStore, JobQueue, RawCache,
// ReportSink/ReportSource, Maintenance

mod cache;
mod connection;
mod error;
mod job_store;
mod maintenance_impl;
mod migration;
mod queue;
mod report_channel;
mod repository_store;
mod rows;
mod store;
mod transaction;

pub use cache::SqliteRawCache;
pub use connection::{create_pool, database_url};
pub use job_store::SqliteJobStore;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use queue::SqliteJobQueue;
pub use report_channel::SqliteReportChannel;
pub use repository_store::SqliteRepositoryStore;
pub use store::SqliteStore;
pub use transaction::SqliteSchedulingTransaction;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
