//! # Resilience Primitives
//!
//! Cross-cutting fault isolation for the two external dependencies (the
//! upstream node and the database). Every outbound call in this project is
//! wrapped in one of these:
//!
//! - [`retry::RetryPolicy`]: bounded attempts with deterministic exponential
//!   backoff, for transient hiccups.
//! - [`circuit_breaker::CircuitBreaker`]: a failure-count threshold that
//!   trips an open state and rejects calls fast until a cooldown elapses,
//!   so a dead dependency does not soak up retry budgets in a loop.

pub mod circuit_breaker;
pub mod retry;
