//! # Subscription Ledger
//!
//! The persistence layer: an idempotent upsert of a username's subscription
//! window and the periodic sweep that deactivates lapsed rows. The merge
//! rule is the sole correctness mechanism for duplicate and out-of-order
//! delivery:
//!
//! - no record, or the current window has already lapsed: write a fresh
//!   window starting now;
//! - the current window is still active: no-op, reported as success. A
//!   duplicate payment (or an early renewal) never stacks extra days, and
//!   a grant never shortens an existing window.
//!
//! Only manual revocation (`days = 0`) shortens a window. Conflicting
//! writes to the same username are serialized by PostgreSQL's atomic
//! upsert, never by application-level locking.

pub mod store;

#[cfg(test)]
pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::resilience::retry::{RetryExhausted, RetryPolicy};

/// One payer's durable subscription window. At most one record exists per
/// username; records are never physically deleted by normal operation.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    /// Payer's account name, 1-16 characters, unique key.
    pub username: String,
    /// Start of the most recently granted window.
    pub subscription_date: DateTime<Utc>,
    /// End of the current window; only ever advances, except by revocation.
    pub expiration_date: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Cached liveness flag; flipped off by the sweep once lapsed.
    pub active: bool,
}

/// What a write actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// A fresh window was written (first payment, or the old one lapsed).
    Granted {
        /// End of the new window.
        expires: DateTime<Utc>,
    },
    /// The existing window still covers now; nothing changed.
    AlreadyActive,
    /// The window was force-ended by manual revocation.
    Revoked,
    /// Revocation targeted a username with no record.
    NotFound,
}

/// Ledger failures. Classification mismatches never reach this layer, and
/// write conflicts are absorbed by the atomic upsert.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The underlying database call failed.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    /// Username is outside the chain's 1-16 character range.
    #[error("invalid username '{0}': must be 1-16 characters")]
    InvalidUsername(String),
    /// The database circuit breaker is open; the call was never attempted.
    #[error("database circuit '{0}' is open")]
    CircuitOpen(String),
}

/// The persistence contract the processor, sweeper and CLI tools depend on.
pub trait SubscriptionLedger: Send + Sync {
    /// Applies the merge rule for `username` with a `days`-long window
    /// anchored at now. `days = 0` routes to [`Self::revoke`].
    async fn grant(&self, username: &str, days: u32) -> Result<GrantOutcome, LedgerError>;

    /// Force-ends `username`'s window immediately.
    async fn revoke(&self, username: &str) -> Result<GrantOutcome, LedgerError>;

    /// Deactivates every record whose window lapsed before `now`; returns
    /// the affected usernames for observability.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError>;

    /// Reads one record, if present.
    async fn lookup(&self, username: &str) -> Result<Option<SubscriptionRecord>, LedgerError>;
}

/// Validates the chain's account-name length constraint before any write.
pub(crate) fn validate_username(username: &str) -> Result<(), LedgerError> {
    let len = username.chars().count();
    if len == 0 || len > 16 {
        return Err(LedgerError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// Decorator applying the database circuit breaker and retry policy to any
/// ledger. Grants and revocations retry (safe: the merge rule is
/// idempotent); the sweep passes through the breaker only, because sweep
/// failures are deferred to the next scheduled tick rather than retried in
/// a tight loop.
#[derive(Clone)]
pub struct ResilientLedger<L> {
    inner: L,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl<L: SubscriptionLedger> ResilientLedger<L> {
    /// Wraps `inner` with the given breaker and retry policy.
    pub fn new(inner: L, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { inner, breaker, retry }
    }
}

fn flatten_retried<T>(
    result: Result<T, BreakerError<RetryExhausted<LedgerError>>>,
) -> Result<T, LedgerError> {
    match result {
        Ok(value) => Ok(value),
        Err(BreakerError::Open { name }) => Err(LedgerError::CircuitOpen(name)),
        Err(BreakerError::Operation(exhausted)) => Err(exhausted.last_error),
    }
}

fn flatten<T>(result: Result<T, BreakerError<LedgerError>>) -> Result<T, LedgerError> {
    match result {
        Ok(value) => Ok(value),
        Err(BreakerError::Open { name }) => Err(LedgerError::CircuitOpen(name)),
        Err(BreakerError::Operation(e)) => Err(e),
    }
}

impl<L: SubscriptionLedger> SubscriptionLedger for ResilientLedger<L> {
    async fn grant(&self, username: &str, days: u32) -> Result<GrantOutcome, LedgerError> {
        flatten_retried(
            self.breaker
                .execute(|| self.retry.execute(|| self.inner.grant(username, days)))
                .await,
        )
    }

    async fn revoke(&self, username: &str) -> Result<GrantOutcome, LedgerError> {
        flatten_retried(
            self.breaker
                .execute(|| self.retry.execute(|| self.inner.revoke(username)))
                .await,
        )
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        flatten(self.breaker.execute(|| self.inner.sweep_expired(now)).await)
    }

    async fn lookup(&self, username: &str) -> Result<Option<SubscriptionRecord>, LedgerError> {
        flatten(self.breaker.execute(|| self.inner.lookup(username)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryLedger;
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    #[tokio::test]
    async fn duplicate_grant_is_a_no_op() {
        let ledger = MemoryLedger::new();
        let first = ledger.grant("alice", 30).await.unwrap();
        let expires = match first {
            GrantOutcome::Granted { expires } => expires,
            other => panic!("expected fresh grant, got {other:?}"),
        };

        let second = ledger.grant("alice", 30).await.unwrap();
        assert_eq!(second, GrantOutcome::AlreadyActive);
        let record = ledger.lookup("alice").await.unwrap().unwrap();
        assert_eq!(record.expiration_date, expires);
    }

    #[tokio::test]
    async fn lapsed_window_is_overwritten() {
        let ledger = MemoryLedger::new();
        ledger.grant("alice", 30).await.unwrap();
        ledger.force_expiration("alice", Utc::now() - ChronoDuration::days(1));

        let before = ledger.lookup("alice").await.unwrap().unwrap();
        let outcome = ledger.grant("alice", 30).await.unwrap();
        let record = ledger.lookup("alice").await.unwrap().unwrap();

        assert!(matches!(outcome, GrantOutcome::Granted { .. }));
        assert!(record.expiration_date > before.expiration_date);
        assert!(record.active);
    }

    #[tokio::test]
    async fn grants_never_shorten_a_window() {
        let ledger = MemoryLedger::new();
        ledger.grant("alice", 365).await.unwrap();
        let long = ledger.lookup("alice").await.unwrap().unwrap();

        // A shorter product paid while the long window is active must not
        // pull the expiration back.
        ledger.grant("alice", 7).await.unwrap();
        let after = ledger.lookup("alice").await.unwrap().unwrap();
        assert_eq!(after.expiration_date, long.expiration_date);
    }

    #[tokio::test]
    async fn revocation_ends_the_window_immediately() {
        let ledger = MemoryLedger::new();
        ledger.grant("alice", 30).await.unwrap();

        // days = 0 is the manual revocation path.
        let outcome = ledger.grant("alice", 0).await.unwrap();
        assert_eq!(outcome, GrantOutcome::Revoked);
        let record = ledger.lookup("alice").await.unwrap().unwrap();
        assert!(!record.active);
        assert!(record.expiration_date <= Utc::now());
    }

    #[tokio::test]
    async fn revoking_unknown_username_reports_not_found() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.revoke("ghost").await.unwrap(), GrantOutcome::NotFound);
    }

    #[tokio::test]
    async fn sweep_deactivates_only_lapsed_rows() {
        let ledger = MemoryLedger::new();
        ledger.grant("lapsed", 30).await.unwrap();
        ledger.grant("current", 30).await.unwrap();
        ledger.force_expiration("lapsed", Utc::now() - ChronoDuration::days(1));

        let affected = ledger.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(affected, vec!["lapsed".to_string()]);
        assert!(!ledger.lookup("lapsed").await.unwrap().unwrap().active);
        assert!(ledger.lookup("current").await.unwrap().unwrap().active);

        // Second sweep finds nothing left to do.
        assert!(ledger.sweep_expired(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn username_length_is_enforced() {
        let ledger = MemoryLedger::new();
        assert!(matches!(
            ledger.grant("", 30).await,
            Err(LedgerError::InvalidUsername(_))
        ));
        assert!(matches!(
            ledger.grant("seventeen-chars-x", 30).await,
            Err(LedgerError::InvalidUsername(_))
        ));
        assert!(ledger.grant("sixteen-chars-xy", 30).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn resilient_ledger_fails_fast_once_breaker_opens() {
        let ledger = MemoryLedger::new();
        ledger.fail_next(10);
        let breaker = Arc::new(CircuitBreaker::new("db", 2, Duration::from_secs(60)));
        let retry = RetryPolicy::new(1, Duration::from_millis(10), 2.0);
        let resilient = ResilientLedger::new(ledger, breaker.clone(), retry);

        assert!(matches!(resilient.grant("alice", 30).await, Err(LedgerError::Db(_))));
        assert!(matches!(resilient.grant("alice", 30).await, Err(LedgerError::Db(_))));
        // Threshold reached; subsequent calls are rejected without touching
        // the inner ledger.
        assert!(matches!(
            resilient.grant("alice", 30).await,
            Err(LedgerError::CircuitOpen(_))
        ));
        assert!(breaker.snapshot().is_open);
    }

    #[tokio::test(start_paused = true)]
    async fn resilient_ledger_retries_transient_grant_failures() {
        let ledger = MemoryLedger::new();
        ledger.fail_next(2);
        let breaker = Arc::new(CircuitBreaker::new("db", 10, Duration::from_secs(60)));
        let retry = RetryPolicy::new(3, Duration::from_millis(10), 2.0);
        let resilient = ResilientLedger::new(ledger, breaker, retry);

        let outcome = resilient.grant("alice", 30).await.unwrap();
        assert!(matches!(outcome, GrantOutcome::Granted { .. }));
    }
}
