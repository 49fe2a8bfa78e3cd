//! # Subscription Monitor Server
//!
//! The long-running production binary for the `subwatch` project. It keeps
//! a streaming subscription to the node's account-operation feed, turns
//! qualifying payments into durable subscription windows, and sweeps
//! lapsed windows on a timer.
//!
//! ## Core Responsibilities:
//! - **Stream Supervision:** Owns the WebSocket connection lifecycle with
//!   a bounded reconnect budget; a supervisor that gives up terminates the
//!   process so the host process manager can restart it.
//! - **Fault Isolation:** Every call to the node or the database passes
//!   through a circuit breaker and a bounded-retry executor.
//! - **Startup Backfill:** Replays a bounded window of account history at
//!   boot to catch payments missed while offline.
//! - **System Health & Lifecycle:** `/health` and `/status` endpoints,
//!   graceful shutdown on `CTRL+C`/`SIGTERM`, explicit dependency wiring
//!   from a single composition root with no ambient global state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use clap::Parser;
use serde_json::json;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lib_subwatch::monitor::backfill;
use lib_subwatch::{
    AppConfig, CircuitBreaker, ConnectionSupervisor, HealthState, HistoryClient, PaymentProcessor,
    PeriodicSweeper, PgSubscriptionLedger, ResilientLedger, TransferClassifier, WsNodeConnector,
};

/// Shared state for the status routes.
struct AppState {
    health: Arc<HealthState>,
    net_breaker: Arc<CircuitBreaker>,
    db_breaker: Arc<CircuitBreaker>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env first, so clap's env fallbacks see it.
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default tracing subscriber");

    let config = AppConfig::parse();
    info!(
        port = config.port,
        accounts = ?config.watch_accounts,
        currency = %config.currency,
        "configuration loaded (URLs hidden)"
    );

    // --- Persistence ---
    let store =
        PgSubscriptionLedger::connect(&config.database_url, config.db_max_connections).await?;
    store.ensure_schema().await?;
    info!("database pool created; schema ensured");

    // --- Resilience: one breaker per external dependency ---
    let net_breaker = config.breaker("node");
    let db_breaker = config.breaker("database");
    let retry = config.retry_policy();

    let ledger = ResilientLedger::new(store.clone(), db_breaker.clone(), retry.clone());
    let classifier = TransferClassifier::new(
        config.watch_accounts.clone(),
        &config.currency,
        &config.products()?,
    )?;
    let processor = PaymentProcessor::new(classifier, ledger.clone());

    // --- Composition root: everything wired explicitly, once ---
    let health = Arc::new(HealthState::new());
    let shutdown = CancellationToken::new();

    let supervisor = ConnectionSupervisor::new(
        WsNodeConnector::new(config.node_ws_url.clone()),
        processor.clone(),
        config.watch_accounts.clone(),
        net_breaker.clone(),
        retry.clone(),
        config.reconnect(),
        health.clone(),
        shutdown.clone(),
    );
    let sweeper = PeriodicSweeper::new(
        ledger.clone(),
        config.sweep_interval(),
        health.clone(),
        shutdown.clone(),
    );

    // Backfill runs concurrently with the live stream; the idempotent
    // merge rule makes the overlap safe.
    let history = HistoryClient::new(&config.node_http_url)?;
    let backfill_accounts = config.watch_accounts.clone();
    let backfill_days = config.backfill_days;
    let backfill_processor = processor.clone();
    tokio::spawn(async move {
        backfill::run(&history, &backfill_processor, &backfill_accounts, backfill_days).await;
    });

    let mut supervisor_handle = tokio::spawn(supervisor.run());
    let sweeper_handle = tokio::spawn(sweeper.run());

    // --- Health/status endpoint ---
    let app_state = Arc::new(AppState {
        health: health.clone(),
        net_breaker,
        db_breaker,
    });
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("status endpoint live at http://{}", addr);
    let http_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(http_token.cancelled_owned())
            .await;
    });

    // --- Run until a signal arrives or the supervisor gives up ---
    let mut early_exit = None;
    tokio::select! {
        _ = shutdown_signal() => {
            warn!("shutdown signal received; closing gracefully");
        }
        result = &mut supervisor_handle => {
            early_exit = Some(result);
        }
    }

    // Shutdown order: subscription first, then the sweeper timer, then the
    // pool. Each step is best-effort.
    shutdown.cancel();
    let supervisor_result = match early_exit {
        Some(result) => result,
        None => supervisor_handle.await,
    };
    let _ = sweeper_handle.await;
    store.pool().close().await;

    let fatal = match supervisor_result {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(anyhow::Error::new(e)),
        Err(e) => Some(anyhow::Error::new(e)),
    };

    match fatal {
        Some(e) => {
            error!(error = %e, "monitor terminated; host supervisor should restart the process");
            Err(e)
        }
        None => {
            info!("monitor stopped cleanly");
            Ok(())
        }
    }
}

/// Liveness probe for load balancers and uptime checkers.
async fn health_handler() -> &'static str {
    "OK"
}

/// Read-only operational snapshot: connection state, reconnect budget
/// consumption, breaker states and the last sweep heartbeat.
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.snapshot();
    Json(json!({
        "connected": health.connected,
        "reconnect_attempts": health.reconnect_attempts,
        "last_sweep": health.last_sweep,
        "circuit_breakers": [state.net_breaker.snapshot(), state.db_breaker.snapshot()],
    }))
}

/// Resolves on `CTRL+C` or, on UNIX, `SIGTERM`.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
