//! # Connection Supervisor
//!
//! Owns the lifecycle of the upstream streaming connection: establish it
//! through the circuit breaker and retry executor, read the event channel,
//! detect disconnects, and reconnect with a bounded budget. Per-item
//! processing failures are isolated (one bad operation never terminates
//! the stream) while connection-level failures consume the reconnect
//! budget and eventually become fatal.
//!
//! Items from a single subscription are processed in delivery order, one
//! at a time. No ordering is guaranteed across a reconnection; the
//! ledger's idempotent merge rule is the sole correctness mechanism for
//! replayed or duplicated operations.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::chain::client::{NodeConnection, NodeConnector, StreamEvent};
use crate::chain::ChainError;
use crate::ledger::SubscriptionLedger;
use crate::monitor::classifier::PaymentProcessor;
use crate::monitor::health::HealthState;
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::resilience::retry::{RetryExhausted, RetryPolicy};

/// Connection-level failures. Everything here has already been through the
/// breaker/retry stack.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The upstream circuit breaker rejected the connection attempt.
    #[error("upstream circuit open; connection attempt rejected")]
    CircuitOpen,
    /// One connect cycle exhausted its retry budget.
    #[error("connection failed: {0}")]
    ConnectFailed(RetryExhausted<ChainError>),
    /// The reconnect budget is gone. The process cannot self-heal past
    /// this point and must be restarted by its host environment.
    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectionExhausted {
        /// Attempts consumed before giving up.
        attempts: u32,
    },
}

/// Reconnection tuning. The delay here is fixed, not exponential; the
/// backoff already happens inside the retry executor each `connect` uses.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Consecutive disconnects tolerated before giving up.
    pub max_attempts: u32,
    /// Fixed pause before each reconnection attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

enum PumpExit {
    Shutdown,
    Lost,
}

/// The supervisor. Generic over the connector so the reconnect machinery
/// is testable without a network.
pub struct ConnectionSupervisor<C: NodeConnector, L> {
    connector: C,
    processor: PaymentProcessor<L>,
    accounts: Vec<String>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    reconnect: ReconnectConfig,
    health: Arc<HealthState>,
    shutdown: CancellationToken,
}

impl<C, L> ConnectionSupervisor<C, L>
where
    C: NodeConnector,
    L: SubscriptionLedger,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: C,
        processor: PaymentProcessor<L>,
        accounts: Vec<String>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        reconnect: ReconnectConfig,
        health: Arc<HealthState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connector,
            processor,
            accounts,
            breaker,
            retry,
            reconnect,
            health,
            shutdown,
        }
    }

    /// Runs until shutdown is signalled (`Ok`) or the reconnect budget is
    /// exhausted (`Err`, fatal).
    pub async fn run(self) -> Result<(), MonitorError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.establish().await {
                Ok(mut conn) => {
                    self.health.set_connected(true);
                    self.health.reset_reconnect_attempts();
                    tracing::info!(accounts = ?self.accounts, "monitoring account operation streams");

                    let exit = self.pump(&mut conn).await;
                    conn.close().await;
                    self.health.set_connected(false);
                    if matches!(exit, PumpExit::Shutdown) {
                        tracing::info!("supervisor stopped; subscription closed");
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connection attempt failed");
                }
            }

            // One disconnect (or failed connect cycle) consumes one unit of
            // the reconnect budget.
            if self.health.reconnect_attempts() >= self.reconnect.max_attempts {
                let attempts = self.health.reconnect_attempts();
                tracing::error!(attempts, "reconnect budget exhausted; giving up");
                return Err(MonitorError::ReconnectionExhausted { attempts });
            }
            let attempt = self.health.bump_reconnect_attempts();
            tracing::info!(
                attempt,
                max_attempts = self.reconnect.max_attempts,
                delay_secs = self.reconnect.delay.as_secs(),
                "reconnecting after delay"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.reconnect.delay) => {}
            }
        }
    }

    /// One connect cycle: circuit breaker around the retry executor around
    /// a from-scratch client build.
    async fn establish(&self) -> Result<C::Conn, MonitorError> {
        let result = self
            .breaker
            .execute(|| self.retry.execute(|| self.connector.connect(&self.accounts)))
            .await;
        match result {
            Ok(conn) => Ok(conn),
            Err(BreakerError::Open { .. }) => Err(MonitorError::CircuitOpen),
            Err(BreakerError::Operation(exhausted)) => Err(MonitorError::ConnectFailed(exhausted)),
        }
    }

    /// Drains the event channel until shutdown or disconnect. The handler
    /// for item `n + 1` does not start until item `n` has settled, but a
    /// failure in item `n` does not block item `n + 1`.
    async fn pump(&self, conn: &mut C::Conn) -> PumpExit {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return PumpExit::Shutdown,
                event = conn.events().recv() => match event {
                    Some(StreamEvent::Operation(op)) => {
                        if let Err(e) = self.processor.process(&op).await {
                            tracing::warn!(
                                from = %op.from,
                                error = %e,
                                "operation processing failed; stream continues"
                            );
                        }
                    }
                    Some(StreamEvent::Disconnected(reason)) => {
                        tracing::warn!(%reason, "upstream disconnected");
                        return PumpExit::Lost;
                    }
                    None => {
                        tracing::warn!("event channel closed by upstream");
                        return PumpExit::Lost;
                    }
                }
            }
        }
    }
}
