//! Daemon configuration from `QUARRY_*` environment variables

use anyhow::{bail, Context, Result};
use quarry_core::application::{ExecutionMode, RetryPolicy};
use serde::Deserialize;
use std::path::PathBuf;

const ENV_PREFIX: &str = "QUARRY";

/// Which half of the system this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// HTTP API, scheduler, report listener, maintenance (plus in-process workers in async mode)
    Server,
    /// Standalone queue worker reporting through the store
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterKind {
    Jsonl,
    Elasticsearch,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default = "default_mode")]
    pub mode: ExecutionMode,

    /// Worker tasks in this process (async mode or worker role)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queues to serve; empty means every registered backend
    #[serde(default)]
    pub queues: Vec<String>,
    /// Prefix of worker ids (defaults to role and pid)
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: i64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: i64,
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,

    #[serde(default = "default_writer")]
    pub writer: WriterKind,
    #[serde(default = "default_writer_path")]
    pub writer_path: String,
    #[serde(default = "default_es_url")]
    pub es_url: String,
    #[serde(default = "default_es_index")]
    pub es_index: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_report_poll_ms")]
    pub report_poll_ms: u64,
    #[serde(default = "default_maintenance_interval_hours")]
    pub maintenance_interval_hours: u64,
    #[serde(default = "default_job_retention_days")]
    pub job_retention_days: i64,
    /// How often repositories with an update interval are checked for a due job
    #[serde(default = "default_update_poll_secs")]
    pub update_poll_secs: u64,
}

fn default_db_path() -> String {
    "~/.quarry/quarry.db".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9528
}

fn default_role() -> Role {
    Role::Server
}

fn default_mode() -> ExecutionMode {
    ExecutionMode::Async
}

fn default_workers() -> usize {
    2
}

fn default_lease_timeout_ms() -> i64 {
    600_000
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> i64 {
    1_000
}

fn default_retry_backoff_factor() -> f64 {
    2.0
}

fn default_writer() -> WriterKind {
    WriterKind::Jsonl
}

fn default_writer_path() -> String {
    "~/.quarry/items.jsonl".to_string()
}

fn default_es_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_es_index() -> String {
    "quarry".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_report_poll_ms() -> u64 {
    500
}

fn default_maintenance_interval_hours() -> u64 {
    24
}

fn default_job_retention_days() -> i64 {
    30
}

fn default_update_poll_secs() -> u64 {
    30
}

impl DaemonConfig {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::from_env(environment())
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let cfg: DaemonConfig = config::Config::builder()
            .add_source(env)
            .build()
            .context("Failed to read QUARRY_* environment")?
            .try_deserialize()
            .context("Invalid QUARRY_* configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.lease_timeout_ms <= 0 {
            bail!("QUARRY_LEASE_TIMEOUT_MS must be positive");
        }
        if self.retry_max_attempts == 0 {
            bail!("QUARRY_RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if self.retry_base_delay_ms < 0 || self.retry_backoff_factor < 1.0 {
            bail!("retry delay must be >= 0 and backoff factor >= 1.0");
        }
        if self.update_poll_secs == 0 {
            bail!("QUARRY_UPDATE_POLL_SECS must be at least 1");
        }
        if self.role == Role::Worker && self.workers == 0 {
            bail!("QUARRY_WORKERS must be at least 1 for the worker role");
        }
        if self.writer == WriterKind::Elasticsearch && self.es_url.trim().is_empty() {
            bail!("QUARRY_ES_URL is required for the elasticsearch writer");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        expand(&self.db_path)
    }

    pub fn writer_path(&self) -> PathBuf {
        expand(&self.writer_path)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_base_delay_ms,
            self.retry_backoff_factor,
        )
    }

    /// Defaults only, ignoring the process environment
    #[cfg(test)]
    pub(crate) fn default_for_tests() -> Self {
        let empty: config::Map<String, String> = config::Map::new();
        Self::from_env(environment().source(Some(empty)))
            .expect("defaults are valid")
    }

    /// Worker id for the `index`-th worker task of this process
    pub fn worker_id(&self, index: usize) -> String {
        let prefix = self
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("{:?}-{}", self.role, std::process::id()).to_lowercase());
        format!("{}-{}", prefix, index)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("queues")
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<DaemonConfig> {
        let source: config::Map<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_env(environment().source(Some(source)))
    }

    #[test]
    fn test_defaults() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.port, 9528);
        assert_eq!(cfg.role, Role::Server);
        assert_eq!(cfg.mode, ExecutionMode::Async);
        assert_eq!(cfg.lease_timeout_ms, 600_000);
        assert_eq!(cfg.retry_max_attempts, 5);
        assert_eq!(cfg.writer, WriterKind::Jsonl);
        assert!(cfg.queues.is_empty());
        assert_eq!(cfg.update_poll_secs, 30);
        assert!(!cfg.db_path().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_env_overrides() {
        let cfg = from_pairs(&[
            ("QUARRY_PORT", "8081"),
            ("QUARRY_MODE", "sync"),
            ("QUARRY_ROLE", "worker"),
            ("QUARRY_QUEUES", "git,http"),
            ("QUARRY_LEASE_TIMEOUT_MS", "30000"),
            ("QUARRY_WRITER", "none"),
            ("QUARRY_WORKER_ID", "box-7"),
        ])
        .unwrap();

        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.mode, ExecutionMode::Sync);
        assert_eq!(cfg.role, Role::Worker);
        assert_eq!(cfg.queues, vec!["git".to_string(), "http".to_string()]);
        assert_eq!(cfg.lease_timeout_ms, 30_000);
        assert_eq!(cfg.writer, WriterKind::None);
        assert_eq!(cfg.worker_id(2), "box-7-2");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(from_pairs(&[("QUARRY_LEASE_TIMEOUT_MS", "0")]).is_err());
        assert!(from_pairs(&[("QUARRY_RETRY_BACKOFF_FACTOR", "0.5")]).is_err());
        assert!(from_pairs(&[("QUARRY_MODE", "sometimes")]).is_err());
        assert!(from_pairs(&[("QUARRY_UPDATE_POLL_SECS", "0")]).is_err());
        assert!(from_pairs(&[("QUARRY_ROLE", "worker"), ("QUARRY_WORKERS", "0")]).is_err());
    }
}
