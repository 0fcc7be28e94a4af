// Queue Domain Model

use crate::domain::cursor::{CachePolicy, Cursor};
use crate::domain::job::JobId;
use crate::domain::report::Progress;
use crate::domain::repository::{BackendArgs, BackendType, RepositoryId};
use serde::{Deserialize, Serialize};

/// Queue identifier (one queue per backend type)
pub type QueueId = String;

/// Durable message row ID
pub type QueueMessageId = i64;

/// Unit of work handed to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: JobId,
    pub repository_id: RepositoryId,
    pub backend: BackendType,
    pub backend_args: BackendArgs,
    pub cache_policy: CachePolicy,
    pub resume_cursor: Option<Cursor>,
}

impl QueueMessage {
    pub fn queue(&self) -> &str {
        self.backend.as_str()
    }
}

/// A message currently held by one worker under a time-bounded lease
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedMessage {
    pub id: QueueMessageId,
    pub queue: QueueId,
    pub message: QueueMessage,

    /// Last checkpoint; `progress.cursor` equals `message.resume_cursor`
    pub progress: Progress,

    /// How many times this message has been handed out, this lease included
    pub deliveries: i64,
    pub lease_owner: String,
    pub lease_expires_at: i64,
}

impl LeasedMessage {
    pub fn is_redelivery(&self) -> bool {
        self.deliveries > 1
    }
}
