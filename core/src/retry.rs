//! Exponential backoff between retry attempts of a single call

use crate::circuit::Config;
use std::time::Duration;

/// Retry budget and backoff bounds for one guarded call
///
/// The delay before retry `i` (0-indexed, taken after the `i`-th failed
/// attempt) is `base_delay * 2^i`, capped at `max_delay`. There is no jitter.
///
/// # Examples
///
/// ```
/// use backoff_breaker::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(2));
///
/// assert_eq!(policy.delay_for(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(4), Duration::from_millis(1600));
/// assert_eq!(policy.delay_for(5), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Total attempts one call may make
    pub fn max_attempts(&self) -> u64 {
        u64::from(self.max_retries) + 1
    }

    /// Delay to wait before retry number `retry` (0-indexed)
    ///
    /// Saturates at `max_delay` when the doubling overflows.
    pub fn delay_for(&self, retry: u32) -> Duration {
        1u32.checked_shl(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self::new(
            config.max_retries,
            config.base_retry_delay,
            config.max_retry_delay,
        )
    }
}
