// Batch source: cached chain first, then the backend (with retries)

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{CacheEntry, CachePolicy, Cursor, Failure, FailureKind, RawBatch, WorkerPhase};
use crate::port::{Backend, BackendError, RawCache, TimeProvider};
use std::time::Duration;
use tracing::{debug, warn};

/// A batch plus where it came from
#[derive(Debug)]
pub struct SourcedBatch {
    pub batch: RawBatch,
    pub from_cache: bool,
}

/// Walks one repository's stream for one job
pub struct BatchSource<'a> {
    job_id: &'a str,
    repository_id: &'a str,
    backend: &'a dyn Backend,
    cache: &'a dyn RawCache,
    time: &'a dyn TimeProvider,
    policy: CachePolicy,
    retry: &'a RetryPolicy,

    /// Set at the first cache miss; the rest of the stream comes from the backend
    cache_exhausted: bool,
}

impl<'a> BatchSource<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: &'a str,
        repository_id: &'a str,
        backend: &'a dyn Backend,
        cache: &'a dyn RawCache,
        time: &'a dyn TimeProvider,
        policy: CachePolicy,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            job_id,
            repository_id,
            backend,
            cache,
            time,
            policy,
            retry,
            cache_exhausted: !policy.reads_cache(),
        }
    }

    /// Next batch after `from`, or `None` at the end of the stream
    pub async fn next(&mut self, from: Option<&Cursor>) -> Result<Option<SourcedBatch>, Failure> {
        if !self.cache_exhausted {
            match self.cache.get(self.repository_id, from).await {
                Ok(Some(entry)) => {
                    debug!(
                        job_id = %self.job_id,
                        from = ?from,
                        next = %entry.next_cursor,
                        "Serving batch from cache"
                    );
                    return Ok(Some(SourcedBatch {
                        batch: entry.to_batch(),
                        from_cache: true,
                    }));
                }
                Ok(None) => {
                    debug!(job_id = %self.job_id, from = ?from, "Cache miss, switching to backend");
                    self.cache_exhausted = true;
                }
                Err(e) => {
                    return Err(Failure::new(
                        FailureKind::Cache,
                        Some(WorkerPhase::Fetching),
                        format!("cache read failed: {}", e),
                    ))
                }
            }
        }

        let batch = match self.fetch_with_retry(from).await? {
            Some(batch) => batch,
            None => return Ok(None),
        };

        if self.policy.writes_cache() {
            let entry = CacheEntry::from_batch(
                self.repository_id,
                from.cloned(),
                &batch,
                self.time.now_millis(),
            );
            // Cache before the writer sees the batch
            if let Err(e) = self.cache.put(&entry).await {
                return Err(Failure::new(
                    FailureKind::Cache,
                    Some(WorkerPhase::Fetching),
                    format!("cache write failed: {}", e),
                ));
            }
        }

        Ok(Some(SourcedBatch {
            batch,
            from_cache: false,
        }))
    }

    async fn fetch_with_retry(&self, from: Option<&Cursor>) -> Result<Option<RawBatch>, Failure> {
        let mut attempt: u32 = 1;
        loop {
            match self.backend.fetch(from).await {
                Ok(batch) => return Ok(batch),
                Err(BackendError::Transient(reason)) => {
                    match self.retry.decide(self.job_id, attempt) {
                        RetryDecision::Retry(delay_ms) => {
                            warn!(
                                job_id = %self.job_id,
                                attempt = attempt,
                                error = %reason,
                                "Transient backend error"
                            );
                            tokio::time::sleep(Duration::from_millis(delay_ms.max(0) as u64))
                                .await;
                            attempt += 1;
                        }
                        RetryDecision::Failed => {
                            return Err(Failure::new(
                                FailureKind::TransientExhausted,
                                Some(WorkerPhase::Fetching),
                                format!("gave up after {} attempts: {}", attempt, reason),
                            ))
                        }
                    }
                }
                Err(e) => {
                    return Err(Failure::new(
                        FailureKind::PermanentBackend,
                        Some(WorkerPhase::Fetching),
                        e.to_string(),
                    ))
                }
            }
        }
    }
}
