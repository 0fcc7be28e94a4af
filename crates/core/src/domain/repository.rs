// Repository Domain Model

use crate::domain::cursor::{CachePolicy, Cursor};
use crate::domain::error::{DomainError, Result};
use crate::domain::job::JobId;
use serde::{Deserialize, Serialize};

/// Repository identity: the unique name or URL the client registered
pub type RepositoryId = String;

/// Backend arguments (free-form, interpreted by the backend only)
pub type BackendArgs = serde_json::Map<String, serde_json::Value>;

const MAX_REPOSITORY_ID_LEN: usize = 2048;

/// Backend identifier, e.g. `git` or `http`. Also names the queue its jobs go to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendType(String);

impl BackendType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub backend: BackendType,
    pub backend_args: BackendArgs,
    pub cache_enabled: bool,

    /// Cursor of the last batch durably written by a job of this repository
    pub cursor: Option<Cursor>,

    /// Busy-lock: set while a PENDING or RUNNING job exists
    pub active_job_id: Option<JobId>,
    pub last_job_id: Option<JobId>,

    /// Continuous updates: a FINISHED job schedules the next one this long after it
    #[serde(default)]
    pub update_interval_ms: Option<i64>,
    /// When the next update job is due (epoch ms), cleared once a job is claimed
    #[serde(default)]
    pub next_update_at: Option<i64>,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
}

impl Repository {
    /// Create a new, idle repository
    pub fn new(
        id: impl Into<String>,
        backend: BackendType,
        backend_args: BackendArgs,
        cache_enabled: bool,
        now_millis: i64,
    ) -> Result<Self> {
        let repo = Self {
            id: id.into(),
            backend,
            backend_args,
            cache_enabled,
            cursor: None,
            active_job_id: None,
            last_job_id: None,
            update_interval_ms: None,
            next_update_at: None,
            created_at: now_millis,
            updated_at: now_millis,
        };
        repo.validate()?;
        Ok(repo)
    }

    /// Opt into continuous updates (`None` turns them off)
    pub fn with_update_interval(mut self, interval_ms: Option<i64>) -> Result<Self> {
        if interval_ms.is_some_and(|ms| ms < 0) {
            return Err(DomainError::Validation(
                "update interval cannot be negative".to_string(),
            ));
        }
        self.update_interval_ms = interval_ms;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DomainError::Validation(
                "repository id cannot be empty".to_string(),
            ));
        }
        if self.id.len() > MAX_REPOSITORY_ID_LEN {
            return Err(DomainError::Validation(format!(
                "repository id too long ({} > {})",
                self.id.len(),
                MAX_REPOSITORY_ID_LEN
            )));
        }
        if self.id.chars().any(char::is_control) {
            return Err(DomainError::Validation(
                "repository id contains control characters".to_string(),
            ));
        }
        if self.backend.as_str().trim().is_empty() {
            return Err(DomainError::Validation(
                "backend type cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.active_job_id.is_some()
    }

    /// Due time of the update following a job that finished at `finished_at`
    pub fn next_update_after(&self, finished_at: i64) -> Option<i64> {
        self.update_interval_ms.map(|interval| finished_at + interval)
    }

    pub fn default_cache_policy(&self) -> CachePolicy {
        CachePolicy::default_for(self.cache_enabled)
    }

    /// Argument snapshot for a new job: repository args with the override merged on top
    pub fn snapshot_args(&self, overrides: Option<&BackendArgs>) -> BackendArgs {
        let mut args = self.backend_args.clone();
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                args.insert(key.clone(), value.clone());
            }
        }
        args
    }
}
