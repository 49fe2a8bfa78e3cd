//! # Retry Executor
//!
//! Wraps a fallible asynchronous operation with bounded attempts and
//! deterministic exponential backoff. No jitter: the delay before attempt
//! `k + 1` is exactly `initial_delay * backoff_factor^(k-1)`, and no delay
//! is inserted after the final failed attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Returned when every attempt has failed; carries the last underlying error.
#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E> {
    /// How many times the operation was actually invoked.
    pub attempts: u32,
    /// The error from the final attempt.
    pub last_error: E,
}

/// Bounded retry with exponential backoff.
///
/// The policy is cheap to clone; one instance is shared per concern
/// (connection establishment, database writes).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1 and
    /// `backoff_factor` to at least 1.0 so a misconfigured policy degrades
    /// to "try once" / "fixed delay" instead of misbehaving.
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_factor: backoff_factor.max(1.0),
        }
    }

    /// Runs `operation` up to `max_attempts` times, suspending between
    /// attempts, and returns the first success. Each failed attempt is
    /// logged at warn level; exhaustion is logged at error level and
    /// surfaced as [`RetryExhausted`].
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "attempt failed"
                    );
                    tracing::error!(attempts = attempt, error = %e, "retry budget exhausted");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.backoff_factor);
                    attempt += 1;
                }
            }
        }
    }
}
