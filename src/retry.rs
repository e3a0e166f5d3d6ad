//! Bounded retry with exponential backoff.
//!
//! Wraps one logical submission. Only transient errors are retried;
//! anything needing user action, a throttle window, or a fresh
//! user-initiated attempt passes straight through with the original
//! error intact.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::Result;

/// Attempt bounds accepted by [`RetryPolicy::new`].
pub const MIN_ATTEMPTS: u32 = 3;
pub const MAX_ATTEMPTS: u32 = 8;

/// Retry schedule for one logical transfer operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    cap_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MIN_ATTEMPTS,
            base_delay: Duration::from_secs(5),
            cap_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget, clamped to
    /// [`MIN_ATTEMPTS`]..=[`MAX_ATTEMPTS`].
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.clamp(MIN_ATTEMPTS, MAX_ATTEMPTS),
            ..Self::default()
        }
    }

    /// Override the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Override the delay cap.
    #[must_use]
    pub fn with_cap_delay(mut self, cap_delay: Duration) -> Self {
        self.cap_delay = cap_delay;
        self
    }

    /// Attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before retrying after `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.cap_delay)
    }

    /// Run `op` under this policy. `op` receives the 1-based attempt
    /// number; the last error is returned unchanged once attempts are
    /// exhausted or a non-retryable error occurs.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, max = self.max_attempts, "Starting attempt");

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() {
                        debug!(attempt, error = %err, "Non-retryable error, giving up");
                        return Err(err);
                    }
                    if attempt >= self.max_attempts {
                        warn!(attempt, error = %err, "Retries exhausted");
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(attempt, error = %err, delay_secs = delay.as_secs(), "Attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
