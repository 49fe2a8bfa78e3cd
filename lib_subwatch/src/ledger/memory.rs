//! In-memory ledger implementing the same merge rule as the PostgreSQL
//! store. Test-only: lets the processor, supervisor and sweeper suites run
//! without a database while still exercising the real contract.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use super::{
    validate_username, GrantOutcome, LedgerError, SubscriptionLedger, SubscriptionRecord,
};

#[derive(Default)]
struct State {
    records: BTreeMap<String, SubscriptionRecord>,
    failures_left: u32,
}

/// Shared-state in-memory ledger; clones see the same records.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<State>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` calls fail with a database error, for resilience
    /// tests.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().failures_left = n;
    }

    /// Rewrites a record's expiration, bypassing the merge rule, to set up
    /// lapsed-window scenarios.
    pub fn force_expiration(&self, username: &str, expiration: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.records.get_mut(username) {
            record.expiration_date = expiration;
        }
    }

    /// Usernames in grant order is not tracked; this returns them sorted.
    pub fn usernames(&self) -> Vec<String> {
        self.state.lock().unwrap().records.keys().cloned().collect()
    }

    fn maybe_fail(state: &mut State) -> Result<(), LedgerError> {
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(LedgerError::Db(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

impl SubscriptionLedger for MemoryLedger {
    async fn grant(&self, username: &str, days: u32) -> Result<GrantOutcome, LedgerError> {
        if days == 0 {
            return self.revoke(username).await;
        }
        validate_username(username)?;
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state)?;

        let now = Utc::now();
        match state.records.get(username) {
            Some(existing) if existing.expiration_date >= now => Ok(GrantOutcome::AlreadyActive),
            _ => {
                let expires = now + Duration::days(i64::from(days));
                state.records.insert(
                    username.to_string(),
                    SubscriptionRecord {
                        username: username.to_string(),
                        subscription_date: now,
                        expiration_date: expires,
                        updated_at: now,
                        active: true,
                    },
                );
                Ok(GrantOutcome::Granted { expires })
            }
        }
    }

    async fn revoke(&self, username: &str) -> Result<GrantOutcome, LedgerError> {
        validate_username(username)?;
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state)?;

        let now = Utc::now();
        match state.records.get_mut(username) {
            Some(record) => {
                record.expiration_date = now;
                record.updated_at = now;
                record.active = false;
                Ok(GrantOutcome::Revoked)
            }
            None => Ok(GrantOutcome::NotFound),
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state)?;

        let mut affected = Vec::new();
        for record in state.records.values_mut() {
            if record.active && record.expiration_date < now {
                record.active = false;
                record.updated_at = now;
                affected.push(record.username.clone());
            }
        }
        Ok(affected)
    }

    async fn lookup(&self, username: &str) -> Result<Option<SubscriptionRecord>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state)?;
        Ok(state.records.get(username).cloned())
    }
}
