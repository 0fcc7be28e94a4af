// Scheduler - single writer of repository and job records

use crate::application::executor::{Dispatch, ExecutionMode, Executor};
use crate::application::locks::RepositoryLocks;
use crate::domain::{
    BackendArgs, BackendType, CachePolicy, Failure, FailureKind, Job, JobId, JobOutcome,
    JobReport, JobState, Progress, Repository,
};
use crate::error::{AppError, Result};
use crate::port::{
    BackendFactory, IdProvider, JobQueue, JobStore, RawCache, ReportSink, RepositoryStore,
    TimeProvider, TransactionalStore,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum jobs returned by a per-repository listing
    pub job_list_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_list_limit: 100,
        }
    }
}

/// Everything the scheduler talks to
#[derive(Clone)]
pub struct SchedulerPorts {
    pub repositories: Arc<dyn RepositoryStore>,
    pub jobs: Arc<dyn JobStore>,
    pub transactions: Arc<dyn TransactionalStore>,
    pub queue: Arc<dyn JobQueue>,
    pub cache: Arc<dyn RawCache>,
    pub backends: Arc<dyn BackendFactory>,
    pub executor: Arc<dyn Executor>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_provider: Arc<dyn IdProvider>,
}

/// Registration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRepository {
    pub id: String,
    pub backend: BackendType,
    #[serde(default)]
    pub backend_args: BackendArgs,
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    /// Reschedule this long after every FINISHED job; absent = manual only
    #[serde(default)]
    pub update_interval_ms: Option<i64>,
}

fn default_cache_enabled() -> bool {
    true
}

/// Analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub repository_id: String,

    /// Merged over the repository's own arguments
    #[serde(default)]
    pub backend_args: Option<BackendArgs>,
    #[serde(default)]
    pub cache_policy: Option<CachePolicy>,
}

impl ScheduleRequest {
    pub fn new(repository_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            backend_args: None,
            cache_policy: None,
        }
    }
}

/// Result of scheduling: the job as it stands when the call returns
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub job: Job,
    pub mode: ExecutionMode,
}

/// Counters for `GET /stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub mode: ExecutionMode,
    pub repositories: i64,
    pub jobs: BTreeMap<String, i64>,
    pub queues: BTreeMap<String, i64>,
}

pub struct Scheduler {
    ports: SchedulerPorts,
    config: SchedulerConfig,
    locks: RepositoryLocks,
}

impl Scheduler {
    pub fn new(ports: SchedulerPorts, config: SchedulerConfig) -> Self {
        Self {
            ports,
            config,
            locks: RepositoryLocks::new(),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.ports.executor.mode()
    }

    // ------------------------------------------------------------------
    // Repositories
    // ------------------------------------------------------------------

    pub async fn register(&self, request: RegisterRepository) -> Result<Repository> {
        if !self.ports.backends.supports(&request.backend) {
            return Err(AppError::Validation(format!(
                "unsupported backend: {}",
                request.backend
            )));
        }
        let now = self.ports.time_provider.now_millis();
        let repository = Repository::new(
            request.id,
            request.backend,
            request.backend_args,
            request.cache_enabled,
            now,
        )?
        .with_update_interval(request.update_interval_ms)?;

        let _guard = self.locks.acquire(&repository.id).await;
        self.ports.repositories.insert(&repository).await?;

        info!(
            repository_id = %repository.id,
            backend = %repository.backend,
            cache_enabled = repository.cache_enabled,
            update_interval_ms = ?repository.update_interval_ms,
            "Repository registered"
        );
        Ok(repository)
    }

    pub async fn unregister(&self, repository_id: &str) -> Result<()> {
        {
            let _guard = self.locks.acquire(repository_id).await;
            if !self.ports.repositories.delete_if_idle(repository_id).await? {
                return match self.ports.repositories.find_by_id(repository_id).await? {
                    None => Err(AppError::NotFound(format!("repository {}", repository_id))),
                    Some(repository) => Err(AppError::RepositoryBusy(format!(
                        "repository {} has active job {}",
                        repository_id,
                        repository.active_job_id.unwrap_or_default()
                    ))),
                };
            }
            match self.ports.cache.clear(repository_id).await {
                Ok(cleared) => debug!(repository_id = %repository_id, cleared = cleared, "Cache cleared"),
                Err(e) => warn!(repository_id = %repository_id, error = %e, "Cache clear failed"),
            }
        }
        self.locks.forget(repository_id);

        info!(repository_id = %repository_id, "Repository unregistered");
        Ok(())
    }

    pub async fn repository_status(&self, repository_id: &str) -> Result<Repository> {
        self.ports
            .repositories
            .find_by_id(repository_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("repository {}", repository_id)))
    }

    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.ports.repositories.list().await
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Create a PENDING job for an idle repository and hand it to the executor
    ///
    /// # Errors
    /// - `NotFound` if the repository is not registered
    /// - `RepositoryBusy` if it already has a PENDING/RUNNING job
    /// - `QueueUnavailable` if the queue refused the message (the job is failed)
    pub async fn schedule_job(&self, request: ScheduleRequest) -> Result<Scheduled> {
        let job = {
            let _guard = self.locks.acquire(&request.repository_id).await;
            let repository = self.repository_status(&request.repository_id).await?;
            if repository.is_busy() {
                return Err(busy(&repository));
            }

            let cache_policy = request
                .cache_policy
                .unwrap_or_else(|| repository.default_cache_policy());
            let args = repository.snapshot_args(request.backend_args.as_ref());
            let job = Job::new(
                self.ports.id_provider.generate_id(),
                self.ports.time_provider.now_millis(),
                &repository,
                args,
                cache_policy,
            );
            self.create_job(&job).await?;
            job
        };

        info!(
            job_id = %job.id,
            repository_id = %job.repository_id,
            cache_policy = %job.cache_policy,
            from_cursor = ?job.from_cursor,
            "Job scheduled"
        );
        self.dispatch(job).await
    }

    /// Schedule a new job resuming where a FAILED job stopped
    pub async fn retry_job(&self, job_id: &str) -> Result<Scheduled> {
        let failed = self.job_status(job_id).await?;
        if failed.state != JobState::Failed {
            return Err(AppError::InvalidState(format!(
                "only FAILED jobs can be retried (job {} is {})",
                job_id, failed.state
            )));
        }

        let job = {
            let _guard = self.locks.acquire(&failed.repository_id).await;
            let repository = self.repository_status(&failed.repository_id).await?;
            if repository.is_busy() {
                return Err(busy(&repository));
            }

            let mut job = Job::new(
                self.ports.id_provider.generate_id(),
                self.ports.time_provider.now_millis(),
                &repository,
                failed.backend_args.clone(),
                failed.cache_policy,
            );
            job.from_cursor = failed.cursor.clone();
            job.cursor = failed.cursor.clone();
            job.retry_of = Some(failed.id.clone());
            self.create_job(&job).await?;
            job
        };

        info!(
            job_id = %job.id,
            retry_of = %failed.id,
            from_cursor = ?job.from_cursor,
            "Retry scheduled"
        );
        self.dispatch(job).await
    }

    /// Schedule a job for every idle repository whose continuous update is due
    ///
    /// Goes through [`Scheduler::schedule_job`], so the busy-lock still decides;
    /// a repository that cannot be scheduled now is skipped until the next round.
    pub async fn schedule_due_updates(&self) -> Result<Vec<Scheduled>> {
        let now = self.ports.time_provider.now_millis();
        let due = self.ports.repositories.find_due_updates(now).await?;

        let mut scheduled = Vec::with_capacity(due.len());
        for repository_id in due {
            match self.schedule_job(ScheduleRequest::new(&repository_id)).await {
                Ok(update) => {
                    info!(
                        repository_id = %repository_id,
                        job_id = %update.job.id,
                        "Continuous update scheduled"
                    );
                    scheduled.push(update);
                }
                Err(AppError::RepositoryBusy(_)) | Err(AppError::NotFound(_)) => {
                    debug!(repository_id = %repository_id, "Due update skipped");
                }
                Err(e) => {
                    warn!(repository_id = %repository_id, error = %e, "Due update failed");
                }
            }
        }
        Ok(scheduled)
    }

    /// Withdraw a PENDING job; RUNNING jobs are not preempted
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let job = self.job_status(job_id).await?;
        let _guard = self.locks.acquire(&job.repository_id).await;
        let mut job = self.job_status(job_id).await?;

        match job.state {
            JobState::Pending => {
                if !self.ports.executor.revoke(job_id).await? {
                    return Err(AppError::InvalidState(format!(
                        "job {} was already picked up by a worker",
                        job_id
                    )));
                }
                let failure = Failure::new(FailureKind::Cancelled, None, "cancelled by client");
                let progress = job.progress();
                job.fail(self.ports.time_provider.now_millis(), failure, &progress)?;
                self.settle(&job).await?;
                info!(job_id = %job_id, "Job cancelled");
                Ok(job)
            }
            JobState::Running => Err(AppError::InvalidState(format!(
                "job {} is RUNNING and cannot be cancelled",
                job_id
            ))),
            state => Err(AppError::InvalidState(format!(
                "job {} is already {}",
                job_id, state
            ))),
        }
    }

    pub async fn job_status(&self, job_id: &str) -> Result<Job> {
        self.ports
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

    /// Jobs of one repository, newest first
    pub async fn list_jobs(&self, repository_id: &str) -> Result<Vec<Job>> {
        self.repository_status(repository_id).await?;
        self.ports
            .jobs
            .list_for_repository(repository_id, self.config.job_list_limit)
            .await
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        let mut jobs = BTreeMap::new();
        for state in JobState::ALL {
            jobs.insert(
                state.to_string(),
                self.ports.jobs.count_by_state(state).await?,
            );
        }
        let mut queues = BTreeMap::new();
        for backend in self.ports.backends.backend_types() {
            let depth = self.ports.queue.depth(backend.as_str()).await?;
            queues.insert(backend.to_string(), depth);
        }
        Ok(SchedulerStats {
            mode: self.mode(),
            repositories: self.ports.repositories.count().await?,
            jobs,
            queues,
        })
    }

    // ------------------------------------------------------------------
    // Worker reports
    // ------------------------------------------------------------------

    pub async fn on_job_started(&self, job_id: &str, worker_id: &str) -> Result<()> {
        let Some(job) = self.ports.jobs.find_by_id(job_id).await? else {
            warn!(job_id = %job_id, "Start report for unknown job");
            return Ok(());
        };
        let _guard = self.locks.acquire(&job.repository_id).await;
        let mut job = self.job_status(job_id).await?;

        match job.state {
            JobState::Pending => {
                job.start(
                    self.ports.time_provider.now_millis(),
                    Some(worker_id.to_string()),
                )?;
                self.ports.jobs.update(&job).await?;
                info!(job_id = %job_id, worker_id = %worker_id, "Job started");
            }
            JobState::Running => {
                // Redelivery after an expired lease
                job.worker_id = Some(worker_id.to_string());
                self.ports.jobs.update(&job).await?;
                warn!(job_id = %job_id, worker_id = %worker_id, "Job restarted by another worker");
            }
            state => {
                warn!(job_id = %job_id, state = %state, "Start report for terminal job ignored");
            }
        }
        Ok(())
    }

    pub async fn on_job_progress(&self, job_id: &str, progress: &Progress) -> Result<()> {
        let Some(job) = self.ports.jobs.find_by_id(job_id).await? else {
            warn!(job_id = %job_id, "Progress report for unknown job");
            return Ok(());
        };
        let _guard = self.locks.acquire(&job.repository_id).await;
        let mut job = self.job_status(job_id).await?;

        if job.state.is_terminal() {
            debug!(job_id = %job_id, "Progress report for terminal job ignored");
            return Ok(());
        }
        if job.state == JobState::Pending {
            job.start(self.ports.time_provider.now_millis(), None)?;
        }
        job.record_progress(progress)?;
        self.ports.jobs.update(&job).await?;
        debug!(job_id = %job_id, cursor = ?progress.cursor, "Job progress recorded");
        Ok(())
    }

    /// Apply a terminal outcome and release the repository's busy-lock
    pub async fn on_job_completed(&self, job_id: &str, outcome: &JobOutcome) -> Result<()> {
        let Some(job) = self.ports.jobs.find_by_id(job_id).await? else {
            warn!(job_id = %job_id, "Completion report for unknown job");
            return Ok(());
        };
        let _guard = self.locks.acquire(&job.repository_id).await;
        let mut job = self.job_status(job_id).await?;

        if job.state.is_terminal() {
            warn!(job_id = %job_id, state = %job.state, "Duplicate completion ignored");
            return Ok(());
        }
        let now = self.ports.time_provider.now_millis();
        if job.state == JobState::Pending {
            job.start(now, None)?;
        }
        match &outcome.failure {
            None => job.finish(now, &outcome.progress)?,
            Some(failure) => job.fail(now, failure.clone(), &outcome.progress)?,
        }
        self.settle(&job).await?;

        match &job.failure {
            None => info!(
                job_id = %job.id,
                repository_id = %job.repository_id,
                cursor = ?job.cursor,
                items = job.items_written,
                "Job completed"
            ),
            Some(failure) => warn!(
                job_id = %job.id,
                repository_id = %job.repository_id,
                cursor = ?job.cursor,
                kind = %failure.kind,
                reason = %failure.reason,
                "Job failed"
            ),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Claim the busy-lock and insert the job in one transaction
    async fn create_job(&self, job: &Job) -> Result<()> {
        let now = self.ports.time_provider.now_millis();
        let mut tx = self.ports.transactions.begin_transaction().await?;
        if !tx.claim_repository(&job.repository_id, &job.id, now).await? {
            tx.rollback().await?;
            return Err(AppError::RepositoryBusy(format!(
                "repository {} already has an active job",
                job.repository_id
            )));
        }
        tx.insert_job(job).await?;
        tx.commit().await
    }

    /// Store a terminal job and release its repository in one transaction
    ///
    /// A FINISHED job of a repository with continuous updates also sets when the
    /// next one is due.
    async fn settle(&self, job: &Job) -> Result<()> {
        let now = self.ports.time_provider.now_millis();
        let next_update_at = match job.state {
            JobState::Finished => self
                .ports
                .repositories
                .find_by_id(&job.repository_id)
                .await?
                .and_then(|repository| repository.next_update_after(now)),
            _ => None,
        };

        let mut tx = self.ports.transactions.begin_transaction().await?;
        tx.update_job(job).await?;
        let released = tx
            .release_repository(
                &job.repository_id,
                &job.id,
                job.cursor.as_ref(),
                next_update_at,
                now,
            )
            .await?;
        tx.commit().await?;
        if !released {
            warn!(
                job_id = %job.id,
                repository_id = %job.repository_id,
                "Repository lock was not held by this job"
            );
        }

        // A terminal job must never be delivered again
        let reason = job.failure.as_ref().map(|f| f.reason.as_str());
        match self.ports.queue.settle_job(&job.id, reason).await {
            Ok(0) => {}
            Ok(settled) => debug!(job_id = %job.id, settled = settled, "Queue messages settled"),
            Err(e) => warn!(job_id = %job.id, error = %e, "Settling queue messages failed"),
        }
        Ok(())
    }

    async fn dispatch(&self, job: Job) -> Result<Scheduled> {
        let mode = self.mode();
        match self.ports.executor.dispatch(job.to_message(), self).await {
            Ok(Dispatch::Enqueued(_)) => Ok(Scheduled { job, mode }),
            Ok(Dispatch::Completed(_)) => {
                let job = self.job_status(&job.id).await?;
                Ok(Scheduled { job, mode })
            }
            Err(e) => {
                let (kind, err) = match e {
                    AppError::QueueUnavailable(reason) => {
                        (FailureKind::QueueUnavailable, AppError::QueueUnavailable(reason))
                    }
                    other => (FailureKind::Internal, other),
                };
                error!(job_id = %job.id, error = %err, "Dispatch failed, abandoning job");
                self.abandon(&job.id, Failure::new(kind, None, err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }

    /// Fail a job that never reached a worker (or whose run could not be reported)
    async fn abandon(&self, job_id: &JobId, failure: Failure) -> Result<()> {
        let job = self.job_status(job_id).await?;
        let _guard = self.locks.acquire(&job.repository_id).await;
        let mut job = self.job_status(job_id).await?;
        if job.state.is_terminal() {
            return Ok(());
        }
        let progress = job.progress();
        job.fail(self.ports.time_provider.now_millis(), failure, &progress)?;
        self.settle(&job).await
    }
}

fn busy(repository: &Repository) -> AppError {
    AppError::RepositoryBusy(format!(
        "repository {} has active job {}",
        repository.id,
        repository.active_job_id.as_deref().unwrap_or("?")
    ))
}

#[async_trait]
impl ReportSink for Scheduler {
    async fn report(&self, report: JobReport) -> Result<()> {
        match report {
            JobReport::Started { job_id, worker_id } => {
                self.on_job_started(&job_id, &worker_id).await
            }
            JobReport::Progress { job_id, progress } => {
                self.on_job_progress(&job_id, &progress).await
            }
            JobReport::Completed { job_id, outcome } => {
                self.on_job_completed(&job_id, &outcome).await
            }
        }
    }
}
