//! Retry policy layered over the job runner.
//!
//! Only adapter failures the fetch error classified as transient are retried.
//! Backoff doubles from the configured base and is capped.

use std::time::Duration;

use crate::core::models::JobResult;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retry_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_attempts: 0,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }

    /// Whether a result from attempt `attempt` warrants another try.
    pub fn should_retry(&self, attempt: u32, result: &JobResult, retryable: bool) -> bool {
        attempt < self.max_attempts() && !result.is_success() && retryable
    }
}
