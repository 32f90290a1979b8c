//! Bounded retry with exponential backoff and per-attempt timeouts.
//!
//! Provider calls (embedding, generation) are the only blocking network operations in the
//! pipeline. Each call type owns its own [`RetryPolicy`]; the component that makes the call decides
//! which errors are retryable and retries locally before surfacing the failure.

use std::future::Future;
use std::time::Duration;

/// Retry budget for a single class of provider call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
    /// Timeout applied to every individual attempt.
    pub attempt_timeout: Duration,
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The last attempt failed with a non-retryable error, or attempts were exhausted.
    Failed {
        /// Error produced by the final attempt.
        error: E,
        /// Number of attempts performed.
        attempts: u32,
    },
    /// The final attempt exceeded the per-attempt timeout.
    TimedOut {
        /// Number of attempts performed.
        attempts: u32,
    },
}

impl RetryPolicy {
    /// Build a policy, clamping the attempt count to at least one.
    pub fn new(max_attempts: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(5),
            attempt_timeout,
        }
    }

    /// Embedding calls are idempotent, so they get a larger attempt budget.
    pub fn embedding_default() -> Self {
        Self::new(4, Duration::from_millis(200), Duration::from_secs(30))
    }

    /// Generation calls are retried sparingly to bound request latency.
    pub fn generation_default() -> Self {
        Self::new(2, Duration::from_millis(200), Duration::from_secs(30))
    }

    /// Policy without delays, for tests and in-process providers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            attempt_timeout: Duration::from_secs(30),
        }
    }

    /// Backoff delay slept after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 1u32 << exponent;
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the budget runs out.
    ///
    /// Timed-out attempts count as retryable failures.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation_name: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(self.attempt_timeout, operation()).await;
            let exhausted = attempt >= self.max_attempts;
            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => {
                    if exhausted || !is_retryable(&error) {
                        return Err(RetryError::Failed {
                            error,
                            attempts: attempt,
                        });
                    }
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        error = %error,
                        "Provider call failed; retrying"
                    );
                }
                Err(_) => {
                    if exhausted {
                        return Err(RetryError::TimedOut { attempts: attempt });
                    }
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        timeout_ms = self.attempt_timeout.as_millis() as u64,
                        "Provider call timed out; retrying"
                    );
                }
            }
            tokio::time::sleep(self.delay_for_attempt(attempt)).await;
        }
    }
}
