// Job Domain Model

use crate::domain::cursor::{CachePolicy, Cursor};
use crate::domain::error::{DomainError, Result};
use crate::domain::queue::QueueMessage;
use crate::domain::report::{Failure, Progress};
use crate::domain::repository::{BackendArgs, BackendType, Repository, RepositoryId};
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Job State
///
/// `PENDING → RUNNING → {FINISHED, FAILED}`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Running,
        JobState::Finished,
        JobState::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Finished => write!(f, "FINISHED"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "FINISHED" => Ok(JobState::Finished),
            "FAILED" => Ok(JobState::Failed),
            other => Err(DomainError::Validation(format!("unknown job state: {}", other))),
        }
    }
}

/// One scheduled execution of a backend fetch against a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub repository_id: RepositoryId,
    pub backend: BackendType,

    /// Immutable copy of the arguments taken at enqueue time
    pub backend_args: BackendArgs,
    pub cache_policy: CachePolicy,
    pub queue: String,
    pub state: JobState,

    /// Cursor the job resumes from
    pub from_cursor: Option<Cursor>,
    /// Last durably recorded cursor
    pub cursor: Option<Cursor>,
    pub items_written: i64,
    pub batches_written: i64,
    pub cache_hits: i64,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    pub worker_id: Option<String>,
    pub failure: Option<Failure>,

    /// Failed job this one resumes
    pub retry_of: Option<JobId>,
}

impl Job {
    /// Create a PENDING job for `repository`
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Enqueue timestamp in epoch ms (injected, not system time)
    /// * `repository` - Owning repository; its cursor becomes the resume point
    /// * `backend_args` - Argument snapshot
    /// * `cache_policy` - Cache interaction for this run
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        repository: &Repository,
        backend_args: BackendArgs,
        cache_policy: CachePolicy,
    ) -> Self {
        Self {
            id: id.into(),
            repository_id: repository.id.clone(),
            backend: repository.backend.clone(),
            backend_args,
            cache_policy,
            queue: repository.backend.as_str().to_string(),
            state: JobState::Pending,
            from_cursor: repository.cursor.clone(),
            cursor: repository.cursor.clone(),
            items_written: 0,
            batches_written: 0,
            cache_hits: 0,
            created_at,
            started_at: None,
            finished_at: None,
            worker_id: None,
            failure: None,
            retry_of: None,
        }
    }

    /// Queue message carrying everything a worker needs to run this job
    pub fn to_message(&self) -> QueueMessage {
        QueueMessage {
            job_id: self.id.clone(),
            repository_id: self.repository_id.clone(),
            backend: self.backend.clone(),
            backend_args: self.backend_args.clone(),
            cache_policy: self.cache_policy,
            resume_cursor: self.cursor.clone(),
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            cursor: self.cursor.clone(),
            items_written: self.items_written,
            batches_written: self.batches_written,
            cache_hits: self.cache_hits,
        }
    }

    /// Transition to Running with explicit timestamp
    pub fn start(&mut self, now_millis: i64, worker_id: Option<String>) -> Result<()> {
        if self.state != JobState::Pending {
            return Err(self.invalid_transition(JobState::Running));
        }
        self.state = JobState::Running;
        self.started_at = Some(now_millis);
        self.worker_id = worker_id;
        Ok(())
    }

    /// Record a checkpoint reported by the worker
    pub fn record_progress(&mut self, progress: &Progress) -> Result<()> {
        if self.state != JobState::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "RUNNING (progress)".to_string(),
            });
        }
        self.apply_progress(progress);
        Ok(())
    }

    /// Transition to Finished with explicit timestamp
    pub fn finish(&mut self, now_millis: i64, progress: &Progress) -> Result<()> {
        if self.state != JobState::Running {
            return Err(self.invalid_transition(JobState::Finished));
        }
        self.apply_progress(progress);
        self.state = JobState::Finished;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Transition to Failed with explicit timestamp
    ///
    /// PENDING jobs may fail directly (cancellation, queue refusal, interrupted
    /// recovery); RUNNING jobs fail from a worker report.
    pub fn fail(&mut self, now_millis: i64, failure: Failure, progress: &Progress) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.invalid_transition(JobState::Failed));
        }
        self.apply_progress(progress);
        self.state = JobState::Failed;
        self.failure = Some(failure);
        self.finished_at = Some(now_millis);
        Ok(())
    }

    fn apply_progress(&mut self, progress: &Progress) {
        self.cursor = progress.cursor.clone();
        self.items_written = progress.items_written;
        self.batches_written = progress.batches_written;
        self.cache_hits = progress.cache_hits;
    }

    fn invalid_transition(&self, to: JobState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}
