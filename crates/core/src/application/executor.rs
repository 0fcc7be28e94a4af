// Executor - how a scheduled job reaches the worker path

use crate::application::runner::{Checkpoint, JobRunner};
use crate::application::worker::constants::INLINE_WORKER_ID;
use crate::application::worker::join_error_message;
use crate::domain::{
    Failure, FailureKind, JobOutcome, JobReport, Progress, QueueMessage, QueueMessageId,
};
use crate::error::{AppError, Result};
use crate::port::{JobQueue, ReportSink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Execution mode selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run the job inside the scheduling request
    Sync,
    /// Enqueue and let workers pick it up
    Async,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sync => write!(f, "sync"),
            ExecutionMode::Async => write!(f, "async"),
        }
    }
}

/// What happened to a dispatched job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Waiting in the queue under this message id
    Enqueued(QueueMessageId),
    /// Already ran to a terminal outcome (reported through the sink)
    Completed(JobOutcome),
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Hand a freshly created job to the worker path
    ///
    /// Reports produced while running inline go to `sink`.
    async fn dispatch(&self, message: QueueMessage, sink: &dyn ReportSink) -> Result<Dispatch>;

    /// Withdraw a job that no worker has picked up yet
    async fn revoke(&self, job_id: &str) -> Result<bool>;
}

/// Distributed mode: push onto the durable queue
pub struct QueuedExecutor {
    queue: Arc<dyn JobQueue>,
}

impl QueuedExecutor {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Executor for QueuedExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }

    async fn dispatch(&self, message: QueueMessage, _sink: &dyn ReportSink) -> Result<Dispatch> {
        match self.queue.enqueue(&message).await {
            Ok(id) => {
                info!(
                    job_id = %message.job_id,
                    queue = %message.queue(),
                    message_id = id,
                    "Job enqueued"
                );
                Ok(Dispatch::Enqueued(id))
            }
            Err(e) => Err(AppError::QueueUnavailable(e.to_string())),
        }
    }

    async fn revoke(&self, job_id: &str) -> Result<bool> {
        self.queue.revoke(job_id).await
    }
}

/// Synchronous mode: run the worker path in the calling task
pub struct InlineExecutor {
    runner: JobRunner,
}

impl InlineExecutor {
    pub fn new(runner: JobRunner) -> Self {
        Self { runner }
    }
}

/// Forwards checkpoints to the dispatching task, which reports them
struct ChannelCheckpoint {
    tx: mpsc::UnboundedSender<Progress>,
}

#[async_trait]
impl Checkpoint for ChannelCheckpoint {
    async fn record(&self, progress: &Progress) -> Result<bool> {
        // Inline jobs are never leased away
        let _ = self.tx.send(progress.clone());
        Ok(true)
    }
}

#[async_trait]
impl Executor for InlineExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    async fn dispatch(&self, message: QueueMessage, sink: &dyn ReportSink) -> Result<Dispatch> {
        let job_id = message.job_id.clone();
        sink.report(JobReport::Started {
            job_id: job_id.clone(),
            worker_id: INLINE_WORKER_ID.to_string(),
        })
        .await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = self.runner.clone();
        let run_message = message.clone();
        // Spawned for panic isolation
        let mut handle = tokio::task::spawn(async move {
            let checkpoint = ChannelCheckpoint { tx };
            runner.run(&run_message, &checkpoint).await
        });

        let mut last_progress = Progress::starting_at(message.resume_cursor.clone());
        let joined = loop {
            tokio::select! {
                biased;
                Some(progress) = rx.recv() => {
                    last_progress = progress.clone();
                    sink.report(JobReport::Progress { job_id: job_id.clone(), progress }).await?;
                }
                joined = &mut handle => break joined,
            }
        };
        while let Ok(progress) = rx.try_recv() {
            last_progress = progress.clone();
            sink.report(JobReport::Progress {
                job_id: job_id.clone(),
                progress,
            })
            .await?;
        }

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let reason = join_error_message(join_err);
                error!(job_id = %job_id, reason = %reason, "Inline job panicked");
                JobOutcome::failed(
                    last_progress,
                    Failure::new(FailureKind::Internal, None, reason),
                )
            }
        };

        sink.report(JobReport::Completed {
            job_id,
            outcome: outcome.clone(),
        })
        .await?;
        Ok(Dispatch::Completed(outcome))
    }

    async fn revoke(&self, _job_id: &str) -> Result<bool> {
        // Nothing waits in a queue in synchronous mode
        Ok(false)
    }
}
