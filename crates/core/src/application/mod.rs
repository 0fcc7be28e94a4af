// Application Layer - Use Cases and Business Logic

pub mod executor;
pub mod locks;
pub mod periodic;
pub mod recovery;
pub mod reporting;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod worker;

// Re-exports
pub use executor::{Dispatch, ExecutionMode, Executor, InlineExecutor, QueuedExecutor};
pub use periodic::{run_periodic, ContinuousUpdates, MaintenanceTask, PeriodicTask};
pub use recovery::{RecoveryReport, RecoveryService};
pub use reporting::ReportListener;
pub use retry::{RetryDecision, RetryPolicy};
pub use runner::{Checkpoint, JobRunner, NoopCheckpoint};
pub use scheduler::{
    RegisterRepository, ScheduleRequest, Scheduled, Scheduler, SchedulerConfig, SchedulerPorts,
    SchedulerStats,
};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerConfig};
