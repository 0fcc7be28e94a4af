// Retry policy for transient backend errors
use tracing::{info, warn};

use crate::application::worker::constants::{
    DEFAULT_RETRY_BACKOFF_FACTOR, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS,
};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the fetch (with backoff delay in ms)
    Retry(i64),
    /// Do not retry, the attempt budget is spent
    Failed,
}

/// Bounded exponential backoff
///
/// `delay = base_delay * (backoff_factor ^ (attempt - 1)) * jitter`, jitter in
/// `0.9..=1.1` and seeded from the job id so one job always backs off the same way.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: i64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            backoff_factor: DEFAULT_RETRY_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: i64, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            backoff_factor,
        }
    }

    /// Decide what happens after attempt number `attempt` (1-based) failed
    pub fn decide(&self, job_id: &str, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            warn!(
                job_id = %job_id,
                attempts = attempt,
                max_attempts = self.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let base_delay_ms = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);

        // ±10% jitter so workers hitting the same backend do not retry in lockstep
        let jitter_seed = job_id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0);

        let delay_ms = (base_delay_ms * jitter_factor) as i64;

        info!(
            job_id = %job_id,
            attempt = attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay_ms,
            "Scheduling fetch retry"
        );

        RetryDecision::Retry(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_within_jitter() {
        let policy = RetryPolicy::new(5, 1000, 2.0);

        for (attempt, expected) in [(1u32, 1000.0), (2, 2000.0), (3, 4000.0), (4, 8000.0)] {
            match policy.decide("job-x", attempt) {
                RetryDecision::Retry(delay) => {
                    let delay = delay as f64;
                    assert!(delay >= expected * 0.9 && delay <= expected * 1.1);
                }
                RetryDecision::Failed => panic!("attempt {} should retry", attempt),
            }
        }
    }

    #[test]
    fn test_budget_exhausted() {
        let policy = RetryPolicy::new(3, 10, 2.0);
        assert_eq!(policy.decide("job-x", 3), RetryDecision::Failed);
        assert_eq!(policy.decide("job-x", 4), RetryDecision::Failed);
    }

    #[test]
    fn test_jitter_is_deterministic_per_job() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide("job-a", 2), policy.decide("job-a", 2));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::new(1, 10, 2.0);
        assert_eq!(policy.decide("job-x", 1), RetryDecision::Failed);
    }
}
