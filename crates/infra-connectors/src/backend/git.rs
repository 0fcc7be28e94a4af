// Git backend: first-parent commit history of a local clone, oldest first
use async_trait::async_trait;
use quarry_core::domain::{BackendArgs, Cursor, Item, RawBatch};
use quarry_core::port::{Backend, BackendError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{optional_str, positive_usize, required_str};

pub const BACKEND_TYPE: &str = "git";

const DEFAULT_BATCH_SIZE: usize = 100;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

// Unit/record separators keep subjects with newlines or tabs intact
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%H%x1f%P%x1f%an%x1f%ae%x1f%at%x1f%cn%x1f%ce%x1f%ct%x1f%s%x1e";

/// Walks `gitpath`'s first-parent history; cursor = last commit hash of a batch
#[derive(Debug, Clone)]
pub struct GitBackend {
    gitpath: PathBuf,
    origin: String,
    batch_size: usize,
}

impl GitBackend {
    /// # Arguments
    /// * `gitpath` - Local clone (required)
    /// * `uri` - Origin recorded on every item (defaults to `gitpath`)
    /// * `batch_size` - Commits per batch (default 100)
    pub fn from_args(args: &BackendArgs) -> Result<Self, BackendError> {
        let gitpath = required_str(args, "gitpath")?;
        let origin = optional_str(args, "uri")?.unwrap_or(gitpath).to_string();
        let batch_size = positive_usize(args, "batch_size", DEFAULT_BATCH_SIZE)?;

        Ok(Self {
            gitpath: PathBuf::from(gitpath),
            origin,
            batch_size,
        })
    }

    /// Run git in the clone with a clean environment and bounded runtime
    async fn run_git(&self, args: &[&str]) -> Result<Vec<u8>, BackendError> {
        if !self.gitpath.is_dir() {
            return Err(BackendError::Permanent(format!(
                "gitpath {} is not a directory",
                self.gitpath.display()
            )));
        }

        let child = git_command(&self.gitpath)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Permanent(format!("failed to spawn git: {}", e)))?;

        let output = match timeout(COMMAND_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(BackendError::Transient(format!("git I/O error: {}", e))),
            Err(_) => {
                return Err(BackendError::Transient(format!(
                    "git {} timed out after {}s",
                    args.first().copied().unwrap_or_default(),
                    COMMAND_TIMEOUT.as_secs()
                )))
            }
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            // Bad revisions and non-repositories do not heal by retrying
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(BackendError::Permanent(format!(
                "git {} failed ({:?}): {}",
                args.join(" "),
                output.status.code(),
                stderr
            )))
        }
    }

    /// Hashes after `from` on the first-parent line, oldest first, at most one batch
    async fn next_hashes(&self, from: Option<&Cursor>) -> Result<Vec<String>, BackendError> {
        let range = match from {
            Some(cursor) => format!("{}..HEAD", cursor.as_str()),
            None => "HEAD".to_string(),
        };
        let stdout = self
            .run_git(&["rev-list", "--first-parent", "--reverse", range.as_str()])
            .await?;

        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(self.batch_size)
            .map(str::to_string)
            .collect())
    }
}

/// git with system/user configuration and prompts disabled
fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

#[async_trait]
impl Backend for GitBackend {
    async fn fetch(&self, from: Option<&Cursor>) -> Result<Option<RawBatch>, BackendError> {
        let hashes = self.next_hashes(from).await?;
        let Some(last) = hashes.last() else {
            return Ok(None);
        };

        let mut args = vec!["log", "--no-walk=unsorted", LOG_FORMAT];
        args.extend(hashes.iter().map(String::as_str));
        let payload = self.run_git(&args).await?;

        debug!(
            gitpath = %self.gitpath.display(),
            commits = hashes.len(),
            next = %last,
            "Fetched git batch"
        );
        Ok(Some(RawBatch::new(Cursor::new(last.clone()), payload)))
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<Item>, BackendError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| BackendError::Permanent(format!("git payload is not UTF-8: {}", e)))?;

        text.split(RECORD_SEP)
            .map(str::trim_start)
            .filter(|record| !record.is_empty())
            .map(|record| self.decode_commit(record))
            .collect()
    }
}

impl GitBackend {
    fn decode_commit(&self, record: &str) -> Result<Item, BackendError> {
        let fields: Vec<&str> = record.splitn(9, FIELD_SEP).collect();
        let [hash, parents, author_name, author_email, authored_at, committer_name, committer_email, committed_at, subject] =
            fields[..]
        else {
            return Err(BackendError::Permanent(format!(
                "malformed git record: {:?}",
                record
            )));
        };

        let timestamp = |raw: &str| {
            raw.parse::<i64>()
                .map_err(|_| BackendError::Permanent(format!("bad git timestamp: {}", raw)))
        };

        let data = serde_json::json!({
            "origin": self.origin,
            "hash": hash,
            "parents": parents.split_whitespace().collect::<Vec<_>>(),
            "author": {"name": author_name, "email": author_email},
            "authored_at": timestamp(authored_at)?,
            "committer": {"name": committer_name, "email": committer_email},
            "committed_at": timestamp(committed_at)?,
            "subject": subject.trim_end(),
        });
        Ok(Item::new(hash, data))
    }
}
