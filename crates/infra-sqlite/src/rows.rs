// Row <-> domain conversions

use crate::error::corrupt;
use quarry_core::domain::{
    BackendArgs, BackendType, CachePolicy, Cursor, Failure, FailureKind, Job, JobState,
    Repository, WorkerPhase,
};
use quarry_core::error::Result;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RepositoryRow {
    id: String,
    backend: String,
    backend_args: String,
    cache_enabled: i64,
    cursor: Option<String>,
    active_job_id: Option<String>,
    last_job_id: Option<String>,
    update_interval_ms: Option<i64>,
    next_update_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl RepositoryRow {
    pub(crate) fn into_repository(self) -> Result<Repository> {
        Ok(Repository {
            backend_args: parse_args("repository", &self.backend_args)?,
            id: self.id,
            backend: BackendType::new(self.backend),
            cache_enabled: self.cache_enabled != 0,
            cursor: self.cursor.map(Cursor::new),
            active_job_id: self.active_job_id,
            last_job_id: self.last_job_id,
            update_interval_ms: self.update_interval_ms,
            next_update_at: self.next_update_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    id: String,
    repository_id: String,
    backend: String,
    backend_args: String,
    cache_policy: String,
    queue: String,
    state: String,
    from_cursor: Option<String>,
    cursor: Option<String>,
    items_written: i64,
    batches_written: i64,
    cache_hits: i64,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    worker_id: Option<String>,
    failure_kind: Option<String>,
    failure_phase: Option<String>,
    failure_reason: Option<String>,
    retry_of: Option<String>,
}

impl JobRow {
    pub(crate) fn into_job(self) -> Result<Job> {
        let state: JobState = self.state.parse().map_err(|e| corrupt("job", e))?;
        let cache_policy: CachePolicy =
            self.cache_policy.parse().map_err(|e| corrupt("job", e))?;

        let failure = match self.failure_kind {
            Some(kind) => {
                let kind: FailureKind = kind.parse().map_err(|e| corrupt("job", e))?;
                let phase = match self.failure_phase.as_deref() {
                    None => None,
                    Some("fetching") => Some(WorkerPhase::Fetching),
                    Some("writing") => Some(WorkerPhase::Writing),
                    Some(other) => return Err(corrupt("job", format!("phase {}", other))),
                };
                Some(Failure::new(kind, phase, self.failure_reason.unwrap_or_default()))
            }
            None => None,
        };

        Ok(Job {
            backend_args: parse_args("job", &self.backend_args)?,
            id: self.id,
            repository_id: self.repository_id,
            backend: BackendType::new(self.backend),
            cache_policy,
            queue: self.queue,
            state,
            from_cursor: self.from_cursor.map(Cursor::new),
            cursor: self.cursor.map(Cursor::new),
            items_written: self.items_written,
            batches_written: self.batches_written,
            cache_hits: self.cache_hits,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            worker_id: self.worker_id,
            failure,
            retry_of: self.retry_of,
        })
    }
}

/// Column values of a job's failure
pub(crate) fn failure_columns(job: &Job) -> (Option<String>, Option<String>, Option<String>) {
    match &job.failure {
        Some(failure) => (
            Some(failure.kind.to_string()),
            failure.phase.map(|p| p.to_string()),
            Some(failure.reason.clone()),
        ),
        None => (None, None, None),
    }
}

pub(crate) fn args_json(args: &BackendArgs) -> String {
    serde_json::Value::Object(args.clone()).to_string()
}

fn parse_args(what: &str, raw: &str) -> Result<BackendArgs> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(corrupt(what, format!("backend_args is not an object: {}", other))),
        Err(e) => Err(corrupt(what, e)),
    }
}

pub(crate) fn cursor_column(cursor: Option<&Cursor>) -> Option<String> {
    cursor.map(|c| c.as_str().to_string())
}
