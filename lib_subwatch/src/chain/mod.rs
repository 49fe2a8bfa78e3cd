//! # Upstream Node Collaborators
//!
//! Everything that talks to (or models data from) the blockchain node:
//!
//! - [`operations`]: the wire model of one streamed operation, the
//!   fixed-point [`operations::Amount`] type and transfer normalization.
//! - [`client`]: the opaque streaming connection capability and its
//!   WebSocket implementation.
//! - [`history`]: the HTTP account-history client used by the startup
//!   backfill scan.

pub mod client;
pub mod history;
pub mod operations;

use thiserror::Error;

/// Errors raised by the upstream node collaborators. These are the
/// transient failures the resilience layer retries.
#[derive(Debug, Error)]
pub enum ChainError {
    /// WebSocket transport failure (connect, read or write).
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// HTTP transport failure from the history client middleware stack.
    #[error("http error: {0}")]
    Http(#[from] reqwest_middleware::Error),
    /// HTTP response could not be read or decoded.
    #[error("http response error: {0}")]
    Response(#[from] reqwest::Error),
    /// A configured endpoint URL did not parse.
    #[error("invalid endpoint '{0}'")]
    Endpoint(String),
    /// The node answered, but with an RPC-level error payload.
    #[error("node rpc error: {0}")]
    Rpc(String),
}
