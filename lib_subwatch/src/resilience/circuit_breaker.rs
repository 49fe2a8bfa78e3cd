//! # Circuit Breaker
//!
//! A failure-count circuit breaker with two states, Closed and Open. There
//! is no half-open probe state: once `reset_timeout` has elapsed since the
//! last failure, the next call is let through optimistically with the
//! counters reset. If that call fails the breaker re-opens immediately and
//! the cooldown clock restarts.
//!
//! One breaker instance guards exactly one external dependency; state is
//! never shared between instances.

use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Error surface of [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the wrapped operation was never invoked.
    #[error("circuit '{name}' is open; rejecting call")]
    Open {
        /// Label of the breaker that rejected the call.
        name: String,
    },
    /// The operation ran and failed; the failure has been counted.
    #[error("{0}")]
    Operation(E),
}

/// Point-in-time view of a breaker, safe to take while calls are in flight.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// The breaker's label.
    pub name: String,
    /// Whether calls are currently being rejected.
    pub is_open: bool,
    /// Consecutive failures recorded since the last success or reset.
    pub failure_count: u32,
    /// Seconds since the most recent failure, if any.
    pub seconds_since_last_failure: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    failure_count: u32,
    is_open: bool,
    last_failure: Option<Instant>,
}

/// A failure-threshold circuit breaker for one external dependency.
///
/// The state block is tiny and guarded by a std mutex that is only held for
/// bookkeeping, never across an await point, so `snapshot` is always safe
/// to call concurrently with `execute`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a breaker. `failure_threshold` is clamped to at least 1.
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            state: Mutex::new(BreakerState {
                failure_count: 0,
                is_open: false,
                last_failure: None,
            }),
        }
    }

    /// Runs `operation` unless the breaker is open. A success resets the
    /// failure count; a failure increments it and opens the breaker once
    /// the threshold is reached.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if self.reject_or_reset() {
            tracing::warn!(breaker = %self.name, "circuit open; call rejected");
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        }
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Exposes the current state for external reporting.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock().unwrap();
        BreakerSnapshot {
            name: self.name.clone(),
            is_open: state.is_open,
            failure_count: state.failure_count,
            seconds_since_last_failure: state.last_failure.map(|t| t.elapsed().as_secs()),
        }
    }

    /// Returns true if the call must be rejected. An open breaker whose
    /// cooldown has elapsed is reset here, letting the current call through.
    fn reject_or_reset(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.is_open {
            return false;
        }
        let cooled_down = state
            .last_failure
            .is_none_or(|t| t.elapsed() >= self.reset_timeout);
        if cooled_down {
            tracing::info!(breaker = %self.name, "cooldown elapsed; resetting circuit");
            state.is_open = false;
            state.failure_count = 0;
            state.last_failure = None;
            return false;
        }
        true
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.failure_count = 0;
    }

    fn record_failure(&self, error: &impl Display) {
        let mut state = self.state.lock().unwrap();
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        if state.failure_count >= self.failure_threshold {
            state.is_open = true;
            tracing::error!(
                breaker = %self.name,
                failures = state.failure_count,
                error = %error,
                "failure threshold reached; circuit opened"
            );
        } else {
            tracing::warn!(
                breaker = %self.name,
                failures = state.failure_count,
                threshold = self.failure_threshold,
                error = %error,
                "failure recorded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test", threshold, reset)
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.execute(|| async { Err::<(), _>("down") }).await
    }

    #[tokio::test(start_paused = true)]
    async fn trips_after_threshold_and_rejects_without_invoking() {
        let b = breaker(2, Duration::from_secs(60));
        assert!(matches!(fail(&b).await, Err(BreakerError::Operation(_))));
        assert!(matches!(fail(&b).await, Err(BreakerError::Operation(_))));

        let invoked = Arc::new(AtomicU32::new(0));
        let i = invoked.clone();
        let result = b
            .execute(move || {
                let i = i.clone();
                async move {
                    i.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>(())
                }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(b.snapshot().is_open);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let b = breaker(3, Duration::from_secs(60));
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        let _ = b.execute(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(b.snapshot().failure_count, 0);
        // Two more failures still do not trip it.
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert!(!b.snapshot().is_open);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_allows_optimistic_call_through() {
        let b = breaker(1, Duration::from_secs(30));
        let _ = fail(&b).await;
        assert!(b.snapshot().is_open);

        tokio::time::advance(Duration::from_secs(30)).await;

        let result = b.execute(|| async { Ok::<_, &str>("recovered") }).await;
        assert_eq!(result.unwrap(), "recovered");
        let snap = b.snapshot();
        assert!(!snap.is_open);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reopens_immediately_when_optimistic_call_fails() {
        let b = breaker(1, Duration::from_secs(30));
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        // Let through, fails, reopens with a fresh cooldown clock.
        assert!(matches!(fail(&b).await, Err(BreakerError::Operation(_))));
        assert!(b.snapshot().is_open);
        assert!(matches!(fail(&b).await, Err(BreakerError::Open { .. })));
    }
}
