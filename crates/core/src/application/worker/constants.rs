// Worker constants
use std::time::Duration;

/// Sleep duration when every queue is empty (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default lease on a dequeued message (10 minutes), renewed at every checkpoint
pub const DEFAULT_LEASE_TIMEOUT_MS: i64 = 10 * 60 * 1000;

/// Default transient-error retry bound for one fetch
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default retry base delay (1000ms = 1s)
pub const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 1000;

/// Default exponential backoff factor
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Reports applied per report-listener poll
pub const REPORT_BATCH_SIZE: i64 = 100;

/// Worker id used by the inline (synchronous) executor
pub const INLINE_WORKER_ID: &str = "inline";
