// Job runner - the worker path shared by inline and queued execution

mod source;

pub use source::{BatchSource, SourcedBatch};

use crate::application::retry::RetryPolicy;
use crate::domain::{
    CachePolicy, Failure, FailureKind, Item, JobOutcome, Progress, QueueMessage, WorkerPhase,
};
use crate::error::Result;
use crate::port::{BackendFactory, ItemWriter, RawCache, TimeProvider, WriterError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Durable record of progress after each written batch
#[async_trait]
pub trait Checkpoint: Send + Sync {
    /// Returns `false` if the job no longer belongs to this worker
    async fn record(&self, progress: &Progress) -> Result<bool>;
}

/// Runs one job: fetch → cache → write → checkpoint, batch by batch
#[derive(Clone)]
pub struct JobRunner {
    backends: Arc<dyn BackendFactory>,
    cache: Arc<dyn RawCache>,
    writer: Arc<dyn ItemWriter>,
    time_provider: Arc<dyn TimeProvider>,
    retry_policy: RetryPolicy,
}

impl JobRunner {
    pub fn new(
        backends: Arc<dyn BackendFactory>,
        cache: Arc<dyn RawCache>,
        writer: Arc<dyn ItemWriter>,
        time_provider: Arc<dyn TimeProvider>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            backends,
            cache,
            writer,
            time_provider,
            retry_policy,
        }
    }

    /// Execute `message` from its resume cursor
    ///
    /// Never returns an error: every failure becomes a FAILED outcome carrying the
    /// cursor of the last batch that was written.
    pub async fn run(&self, message: &QueueMessage, checkpoint: &dyn Checkpoint) -> JobOutcome {
        self.run_from(message, Progress::starting_at(message.resume_cursor.clone()), checkpoint)
            .await
    }

    /// Same as [`JobRunner::run`], continuing counters of an earlier delivery
    pub async fn run_from(
        &self,
        message: &QueueMessage,
        mut progress: Progress,
        checkpoint: &dyn Checkpoint,
    ) -> JobOutcome {
        match self.run_batches(message, checkpoint, &mut progress).await {
            Ok(()) => {
                info!(
                    job_id = %message.job_id,
                    repository_id = %message.repository_id,
                    batches = progress.batches_written,
                    items = progress.items_written,
                    cache_hits = progress.cache_hits,
                    cursor = ?progress.cursor,
                    "Job finished"
                );
                JobOutcome::finished(progress)
            }
            Err(failure) => {
                warn!(
                    job_id = %message.job_id,
                    repository_id = %message.repository_id,
                    kind = %failure.kind,
                    phase = ?failure.phase,
                    reason = %failure.reason,
                    cursor = ?progress.cursor,
                    "Job failed"
                );
                JobOutcome::failed(progress, failure)
            }
        }
    }

    async fn run_batches(
        &self,
        message: &QueueMessage,
        checkpoint: &dyn Checkpoint,
        progress: &mut Progress,
    ) -> std::result::Result<(), Failure> {
        let backend = self
            .backends
            .create(&message.backend, &message.backend_args)
            .map_err(|e| {
                Failure::new(
                    FailureKind::PermanentBackend,
                    Some(WorkerPhase::Fetching),
                    e.to_string(),
                )
            })?;

        if message.cache_policy == CachePolicy::Refresh {
            let cleared = self.cache.clear(&message.repository_id).await.map_err(|e| {
                Failure::new(
                    FailureKind::Cache,
                    Some(WorkerPhase::Fetching),
                    format!("cache clear failed: {}", e),
                )
            })?;
            debug!(job_id = %message.job_id, cleared = cleared, "Cache cleared for refresh");
        }

        let mut source = BatchSource::new(
            &message.job_id,
            &message.repository_id,
            backend.as_ref(),
            self.cache.as_ref(),
            self.time_provider.as_ref(),
            message.cache_policy,
            &self.retry_policy,
        );

        loop {
            // FETCHING
            let from = progress.cursor.clone();
            let sourced = match source.next(from.as_ref()).await? {
                Some(sourced) => sourced,
                None => break,
            };
            if Some(&sourced.batch.next) == from.as_ref() {
                return Err(Failure::new(
                    FailureKind::PermanentBackend,
                    Some(WorkerPhase::Fetching),
                    format!("backend did not advance past cursor {}", sourced.batch.next),
                ));
            }
            let items = backend.decode(&sourced.batch.payload).map_err(|e| {
                Failure::new(
                    FailureKind::PermanentBackend,
                    Some(WorkerPhase::Fetching),
                    format!("undecodable payload: {}", e),
                )
            })?;

            // WRITING
            if !items.is_empty() {
                self.write_batch(&items).await?;
            }
            progress.advance(sourced.batch.next, items.len(), sourced.from_cache);

            match checkpoint.record(progress).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(Failure::new(
                        FailureKind::LeaseLost,
                        Some(WorkerPhase::Writing),
                        "lease taken over by another worker",
                    ))
                }
                Err(e) => {
                    return Err(Failure::new(
                        FailureKind::Internal,
                        Some(WorkerPhase::Writing),
                        format!("checkpoint failed: {}", e),
                    ))
                }
            }
        }

        self.writer
            .flush()
            .await
            .map_err(|e| writer_failure(format!("{} writer: {}", self.writer.name(), e)))
    }

    /// A batch counts as written only when the sink took every item of it
    async fn write_batch(&self, items: &[Item]) -> std::result::Result<(), Failure> {
        let name = self.writer.name();
        let accepted = match self.writer.write(items).await {
            Ok(accepted) => accepted,
            Err(WriterError::Rejected { accepted, reason }) => {
                return Err(writer_failure(format!(
                    "{} writer accepted {} of {} items: {}",
                    name,
                    accepted,
                    items.len(),
                    reason
                )))
            }
            Err(e) => return Err(writer_failure(format!("{} writer: {}", name, e))),
        };
        if accepted < items.len() {
            return Err(writer_failure(format!(
                "{} writer accepted {} of {} items",
                name,
                accepted,
                items.len()
            )));
        }
        Ok(())
    }
}

fn writer_failure(reason: String) -> Failure {
    Failure::new(FailureKind::Writer, Some(WorkerPhase::Writing), reason)
}

/// Checkpoint that accepts everything (tests, dry runs)
pub struct NoopCheckpoint;

#[async_trait]
impl Checkpoint for NoopCheckpoint {
    async fn record(&self, _progress: &Progress) -> Result<bool> {
        Ok(true)
    }
}
