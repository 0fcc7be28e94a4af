//! Request/Response Types
//!
//! Request bodies reuse the scheduler's own request types
//! (`RegisterRepository`, `ScheduleRequest`); responses wrap domain records.

use quarry_core::application::{ExecutionMode, Scheduled};
use quarry_core::domain::{Job, JobId, JobState};
use serde::{Deserialize, Serialize};

/// POST /jobs and POST /jobs/{id}/retry
///
/// Queued dispatch answers 202 with the PENDING job; inline dispatch answers 200
/// with the job already terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub mode: ExecutionMode,
    pub job: Job,
}

impl From<Scheduled> for ScheduledResponse {
    fn from(scheduled: Scheduled) -> Self {
        Self {
            job_id: scheduled.job.id.clone(),
            state: scheduled.job.state,
            mode: scheduled.mode,
            job: scheduled.job,
        }
    }
}

/// GET /health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub mode: ExecutionMode,
}
