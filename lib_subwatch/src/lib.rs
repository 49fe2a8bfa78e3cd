//! # subwatch Core Library
//!
//! Shared library for the `subwatch` project: a single-process service that
//! watches one blockchain account's operation stream for payments matching a
//! configured subscription product and maintains a durable record of each
//! payer's active subscription window in PostgreSQL.
//!
//! ## Module Map:
//! - [`resilience`]: the fault-isolation primitives every external call goes
//!   through (bounded retry with exponential backoff, circuit breaker).
//! - [`chain`]: the upstream node collaborators (WebSocket operation stream,
//!   HTTP account-history client) and the wire/amount types.
//! - [`ledger`]: the persistence layer; idempotent subscription upserts and
//!   the expiration sweep against PostgreSQL.
//! - [`monitor`]: the connection supervisor, transfer classifier/processor,
//!   periodic sweeper, startup backfill and the shared health state.
//! - [`config`]: environment/CLI configuration shared by the server and the
//!   operational tools.

#![forbid(unsafe_code)]
#![allow(async_fn_in_trait)]

pub mod chain;
pub mod config;
pub mod ledger;
pub mod monitor;
pub mod resilience;

// Re-export the types the binaries compose with.
pub use chain::client::{NodeConnection, NodeConnector, StreamEvent, WsNodeConnector};
pub use chain::history::{HistoryClient, HistorySource};
pub use chain::operations::{Amount, RawOperation, TransferEvent};
pub use config::AppConfig;
pub use ledger::store::PgSubscriptionLedger;
pub use ledger::{GrantOutcome, LedgerError, ResilientLedger, SubscriptionLedger, SubscriptionRecord};
pub use monitor::classifier::{PaymentProcessor, Product, TransferClassifier};
pub use monitor::health::HealthState;
pub use monitor::supervisor::{ConnectionSupervisor, MonitorError};
pub use monitor::sweeper::PeriodicSweeper;
pub use resilience::circuit_breaker::{BreakerError, BreakerSnapshot, CircuitBreaker};
pub use resilience::retry::{RetryExhausted, RetryPolicy};
