// Execution reports exchanged between workers and the scheduler

use crate::domain::cursor::Cursor;
use crate::domain::job::JobId;
use serde::{Deserialize, Serialize};

/// Phase a worker was in when a job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Fetching,
    Writing,
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerPhase::Fetching => write!(f, "fetching"),
            WorkerPhase::Writing => write!(f, "writing"),
        }
    }
}

/// Failure classification recorded on a FAILED job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend refused the job (bad credentials, malformed identity, unknown backend)
    PermanentBackend,
    /// Transient backend errors outlived the retry budget
    TransientExhausted,
    /// The writer rejected a batch
    Writer,
    /// The raw cache could not be read or written
    Cache,
    /// Revoked while still PENDING
    Cancelled,
    /// Left non-terminal by a process that went away
    Interrupted,
    /// The queue refused the message at schedule time
    QueueUnavailable,
    /// The worker lost its lease to another worker; never reported to the scheduler
    LeaseLost,
    /// Anything else (panics, store errors during execution)
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::PermanentBackend => "permanent_backend",
            FailureKind::TransientExhausted => "transient_exhausted",
            FailureKind::Writer => "writer",
            FailureKind::Cache => "cache",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Interrupted => "interrupted",
            FailureKind::QueueUnavailable => "queue_unavailable",
            FailureKind::LeaseLost => "lease_lost",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FailureKind {
    type Err = crate::domain::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|_| {
            crate::domain::DomainError::Validation(format!("unknown failure kind: {}", s))
        })
    }
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub phase: Option<WorkerPhase>,
    pub reason: String,
}

impl Failure {
    pub fn new(kind: FailureKind, phase: Option<WorkerPhase>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            phase,
            reason: reason.into(),
        }
    }
}

/// Durable progress of a job: everything up to `cursor` has been written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub cursor: Option<Cursor>,
    pub items_written: i64,
    pub batches_written: i64,
    pub cache_hits: i64,
}

impl Progress {
    pub fn starting_at(cursor: Option<Cursor>) -> Self {
        Self {
            cursor,
            ..Self::default()
        }
    }

    /// Record one written batch ending at `next`
    pub fn advance(&mut self, next: Cursor, items: usize, from_cache: bool) {
        self.cursor = Some(next);
        self.items_written += items as i64;
        self.batches_written += 1;
        if from_cache {
            self.cache_hits += 1;
        }
    }
}

/// Terminal result of running one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub progress: Progress,
    pub failure: Option<Failure>,
}

impl JobOutcome {
    pub fn finished(progress: Progress) -> Self {
        Self {
            progress,
            failure: None,
        }
    }

    pub fn failed(progress: Progress, failure: Failure) -> Self {
        Self {
            progress,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn lease_lost(&self) -> bool {
        matches!(&self.failure, Some(f) if f.kind == FailureKind::LeaseLost)
    }
}

/// Message on the result-reporting channel (worker → scheduler)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobReport {
    Started {
        job_id: JobId,
        worker_id: String,
    },
    Progress {
        job_id: JobId,
        progress: Progress,
    },
    Completed {
        job_id: JobId,
        outcome: JobOutcome,
    },
}

impl JobReport {
    pub fn job_id(&self) -> &str {
        match self {
            JobReport::Started { job_id, .. }
            | JobReport::Progress { job_id, .. }
            | JobReport::Completed { job_id, .. } => job_id,
        }
    }
}
