use std::time::Duration;
use tracing::warn;

use super::CloneError;

/// Bounded exponential backoff for transport faults.
///
/// The poller owns the loop (it also has a deadline and a cancellation token
/// to juggle), this type just answers "may I try again?" and "how long do I
/// wait first?".
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 disables jitter, 1.0 allows up to +100%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// plus jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential = self.base_delay.saturating_mul(2_u32.pow(exponent));
        let jittered = if self.jitter > 0.0 {
            exponential.mul_f64(1.0 + rand::random::<f64>() * self.jitter)
        } else {
            exponential
        };
        jittered.min(self.max_delay)
    }

    /// Decides whether `error` (seen on failure number `attempt`) earns another try.
    pub fn should_retry(&self, error: &CloneError, attempt: u32) -> bool {
        if !error.is_retryable() {
            return false;
        }
        if attempt > self.max_retries {
            return false;
        }
        warn!(
            error = %error,
            retry_count = attempt,
            max_retries = self.max_retries,
            "Transient failure, retrying"
        );
        true
    }
}
