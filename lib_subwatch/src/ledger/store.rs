//! # PostgreSQL Subscription Store
//!
//! The production [`SubscriptionLedger`] over an `sqlx` connection pool.
//! The merge rule lives in a single upsert statement so concurrent grants
//! for the same username are serialized by the storage engine's conflict
//! resolution, with no application-level locking.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{
    validate_username, GrantOutcome, LedgerError, SubscriptionLedger, SubscriptionRecord,
};

/// The atomic merge-rule upsert. The `WHERE` guard makes the update a
/// no-op while the existing window still covers the grant time, so the
/// statement returns a row exactly when something was written.
const GRANT_SQL: &str = "\
INSERT INTO subscriptions (username, subscription_date, expiration_date, updated_at, active)
VALUES ($1, $2, $3, $2, TRUE)
ON CONFLICT (username) DO UPDATE
   SET subscription_date = EXCLUDED.subscription_date,
       expiration_date   = EXCLUDED.expiration_date,
       updated_at        = EXCLUDED.updated_at,
       active            = TRUE
 WHERE subscriptions.expiration_date < EXCLUDED.subscription_date
RETURNING expiration_date";

const REVOKE_SQL: &str = "\
UPDATE subscriptions
   SET expiration_date = $2, updated_at = $2, active = FALSE
 WHERE username = $1
RETURNING username";

const SWEEP_SQL: &str = "\
UPDATE subscriptions
   SET active = FALSE, updated_at = $1
 WHERE expiration_date < $1 AND active = TRUE
RETURNING username";

const LOOKUP_SQL: &str = "\
SELECT username, subscription_date, expiration_date, updated_at, active
  FROM subscriptions
 WHERE username = $1";

const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS subscriptions (
        username          VARCHAR(16) PRIMARY KEY,
        subscription_date TIMESTAMPTZ NOT NULL,
        expiration_date   TIMESTAMPTZ NOT NULL,
        updated_at        TIMESTAMPTZ NOT NULL,
        active            BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_expiration
        ON subscriptions (expiration_date)",
];

/// PostgreSQL-backed subscription ledger.
#[derive(Clone)]
pub struct PgSubscriptionLedger {
    pool: PgPool,
}

impl PgSubscriptionLedger {
    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a pool for the given database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// The underlying pool, for shutdown draining.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent schema creation: the `subscriptions` table plus the
    /// expiration index the sweep scans.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Health probe for the status endpoint.
    pub async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

impl SubscriptionLedger for PgSubscriptionLedger {
    async fn grant(&self, username: &str, days: u32) -> Result<GrantOutcome, LedgerError> {
        if days == 0 {
            return self.revoke(username).await;
        }
        validate_username(username)?;

        let now = Utc::now();
        let candidate = now + chrono::Duration::days(i64::from(days));
        let written: Option<DateTime<Utc>> = sqlx::query_scalar(GRANT_SQL)
            .bind(username)
            .bind(now)
            .bind(candidate)
            .fetch_optional(&self.pool)
            .await?;

        match written {
            Some(expires) => {
                tracing::info!(%username, days, %expires, "subscription window written");
                Ok(GrantOutcome::Granted { expires })
            }
            None => {
                tracing::info!(%username, days, "window still active; grant is a no-op");
                Ok(GrantOutcome::AlreadyActive)
            }
        }
    }

    async fn revoke(&self, username: &str) -> Result<GrantOutcome, LedgerError> {
        validate_username(username)?;
        let now = Utc::now();
        let revoked: Option<String> = sqlx::query_scalar(REVOKE_SQL)
            .bind(username)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        match revoked {
            Some(_) => {
                tracing::warn!(%username, "subscription revoked");
                Ok(GrantOutcome::Revoked)
            }
            None => Ok(GrantOutcome::NotFound),
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let affected: Vec<String> = sqlx::query_scalar(SWEEP_SQL)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(affected)
    }

    async fn lookup(&self, username: &str) -> Result<Option<SubscriptionRecord>, LedgerError> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(LOOKUP_SQL)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}
