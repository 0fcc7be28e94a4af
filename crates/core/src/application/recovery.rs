// Startup recovery
use crate::application::executor::ExecutionMode;
use crate::domain::{Failure, FailureKind, Job, JobState};
use crate::error::Result;
use crate::port::{JobQueue, JobStore, TimeProvider, TransactionalStore};
use std::sync::Arc;
use tracing::{info, warn};

/// What a reconcile pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-terminal jobs whose message was missing and has been re-enqueued
    pub requeued: usize,
    /// Non-terminal jobs failed as `interrupted`
    pub interrupted: usize,
}

/// Reconciles jobs left non-terminal by a process that went away
///
/// Run once at startup, before the API accepts requests and after pending worker
/// reports have been applied.
pub struct RecoveryService {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    transactions: Arc<dyn TransactionalStore>,
    time_provider: Arc<dyn TimeProvider>,
    mode: ExecutionMode,
}

impl RecoveryService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        transactions: Arc<dyn TransactionalStore>,
        time_provider: Arc<dyn TimeProvider>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            jobs,
            queue,
            transactions,
            time_provider,
            mode,
        }
    }

    /// Queued mode re-enqueues from the recorded cursor; inline mode fails the job
    pub async fn reconcile(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for state in [JobState::Pending, JobState::Running] {
            for job in self.jobs.find_by_state(state).await? {
                match self.mode {
                    ExecutionMode::Async => {
                        if self.queue.has_live_message(&job.id).await? {
                            continue;
                        }
                        let message_id = self
                            .queue
                            .enqueue_resumed(&job.to_message(), &job.progress())
                            .await?;
                        warn!(
                            job_id = %job.id,
                            state = %job.state,
                            resume_cursor = ?job.cursor,
                            message_id = message_id,
                            "Re-enqueued orphaned job"
                        );
                        report.requeued += 1;
                    }
                    ExecutionMode::Sync => {
                        self.interrupt(job).await?;
                        report.interrupted += 1;
                    }
                }
            }
        }

        info!(
            requeued = report.requeued,
            interrupted = report.interrupted,
            "Job recovery complete"
        );
        Ok(report)
    }

    async fn interrupt(&self, mut job: Job) -> Result<()> {
        let now = self.time_provider.now_millis();
        let progress = job.progress();
        job.fail(
            now,
            Failure::new(
                FailureKind::Interrupted,
                None,
                "daemon stopped while the job was active",
            ),
            &progress,
        )?;

        let mut tx = self.transactions.begin_transaction().await?;
        tx.update_job(&job).await?;
        tx.release_repository(&job.repository_id, &job.id, job.cursor.as_ref(), None, now)
            .await?;
        tx.commit().await?;

        warn!(job_id = %job.id, cursor = ?job.cursor, "Interrupted job marked FAILED");
        Ok(())
    }
}
