// Worker - Job execution loop (distributed mode)

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::*;
pub use panic_guard::join_error_message;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::runner::{Checkpoint, JobRunner};
use crate::domain::{
    Failure, FailureKind, JobOutcome, JobReport, LeasedMessage, Progress, QueueMessageId,
};
use crate::error::Result;
use crate::port::{JobQueue, JobStore, ReportSink};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,

    /// Queues (backend types) this worker serves, polled round-robin
    pub queues: Vec<String>,
    pub lease_timeout_ms: i64,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, queues: Vec<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            queues,
            lease_timeout_ms: DEFAULT_LEASE_TIMEOUT_MS,
        }
    }
}

/// Leases one message at a time, runs it, reports, then acks
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    jobs: Arc<dyn JobStore>,
    runner: JobRunner,
    sink: Arc<dyn ReportSink>,
    next_queue: AtomicUsize,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        jobs: Arc<dyn JobStore>,
        runner: JobRunner,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            config,
            queue,
            jobs,
            runner,
            sink,
            next_queue: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            queues = ?self.config.queues,
            "Worker started"
        );
        loop {
            if shutdown.is_shutdown() {
                info!(worker_id = %self.config.worker_id, "Worker shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    // Nothing leased, sleep briefly (or wait for shutdown)
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker_id = %self.config.worker_id, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.config.worker_id, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker_id = %self.config.worker_id, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(worker_id = %self.config.worker_id, "Worker stopped");
        Ok(())
    }

    /// Lease and process one message (returns true if a message was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let count = self.config.queues.len();
        if count == 0 {
            return Ok(false);
        }
        let start = self.next_queue.fetch_add(1, Ordering::Relaxed) % count;

        for offset in 0..count {
            let queue = &self.config.queues[(start + offset) % count];
            let leased = self
                .queue
                .dequeue(queue, &self.config.worker_id, self.config.lease_timeout_ms)
                .await?;
            if let Some(leased) = leased {
                self.process(leased).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn process(&self, leased: LeasedMessage) -> Result<()> {
        let job_id = leased.message.job_id.clone();
        info!(
            worker_id = %self.config.worker_id,
            job_id = %job_id,
            repository_id = %leased.message.repository_id,
            queue = %leased.queue,
            deliveries = leased.deliveries,
            resume_cursor = ?leased.message.resume_cursor,
            "Processing job"
        );
        if leased.is_redelivery() {
            warn!(job_id = %job_id, deliveries = leased.deliveries, "Resuming redelivered job");
        }

        // The job may have settled after its previous owner reported but before it acked
        match self.jobs.find_by_id(&job_id).await? {
            Some(job) if job.state.is_terminal() => {
                info!(job_id = %job_id, state = %job.state, "Job already terminal, dropping message");
                self.queue.ack(leased.id, &self.config.worker_id).await?;
                return Ok(());
            }
            Some(_) => {}
            None => {
                warn!(job_id = %job_id, "Message for unknown job, dropping");
                self.queue
                    .fail(leased.id, &self.config.worker_id, "unknown job")
                    .await?;
                return Ok(());
            }
        }

        self.sink
            .report(JobReport::Started {
                job_id: job_id.clone(),
                worker_id: self.config.worker_id.clone(),
            })
            .await?;

        let last_progress = Arc::new(Mutex::new(leased.progress.clone()));
        let checkpoint = LeaseCheckpoint {
            queue: Arc::clone(&self.queue),
            sink: Arc::clone(&self.sink),
            message_id: leased.id,
            owner: self.config.worker_id.clone(),
            job_id: job_id.clone(),
            lease_ms: self.config.lease_timeout_ms,
            last_progress: Arc::clone(&last_progress),
        };

        // Execute with panic isolation: a panicking backend must not kill the worker
        let runner = self.runner.clone();
        let message = leased.message.clone();
        let start = leased.progress.clone();
        let handle = tokio::task::spawn(async move {
            runner.run_from(&message, start, &checkpoint).await
        });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let reason = join_error_message(join_err);
                error!(job_id = %job_id, reason = %reason, "Job panicked");
                let progress = last_progress
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                JobOutcome::failed(progress, Failure::new(FailureKind::Internal, None, reason))
            }
        };

        if outcome.lease_lost() {
            // Another worker owns the message now; it reports and acks
            warn!(job_id = %job_id, "Lease lost, abandoning job");
            return Ok(());
        }

        self.sink
            .report(JobReport::Completed {
                job_id: job_id.clone(),
                outcome: outcome.clone(),
            })
            .await?;

        let settled = match &outcome.failure {
            None => self.queue.ack(leased.id, &self.config.worker_id).await?,
            Some(failure) => {
                self.queue
                    .fail(leased.id, &self.config.worker_id, &failure.reason)
                    .await?
            }
        };
        if !settled {
            // Settled by the scheduler along with the job, or the lease expired
            debug!(job_id = %job_id, message_id = leased.id, "Message already settled");
        }
        Ok(())
    }
}

/// Checkpoint that renews the lease and reports progress
struct LeaseCheckpoint {
    queue: Arc<dyn JobQueue>,
    sink: Arc<dyn ReportSink>,
    message_id: QueueMessageId,
    owner: String,
    job_id: String,
    lease_ms: i64,
    last_progress: Arc<Mutex<Progress>>,
}

#[async_trait]
impl Checkpoint for LeaseCheckpoint {
    async fn record(&self, progress: &Progress) -> Result<bool> {
        let held = self
            .queue
            .checkpoint(self.message_id, &self.owner, progress, self.lease_ms)
            .await?;
        if !held {
            return Ok(false);
        }
        if let Ok(mut last) = self.last_progress.lock() {
            *last = progress.clone();
        }
        self.sink
            .report(JobReport::Progress {
                job_id: self.job_id.clone(),
                progress: progress.clone(),
            })
            .await?;
        Ok(true)
    }
}
