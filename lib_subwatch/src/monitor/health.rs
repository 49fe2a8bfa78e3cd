//! Shared health state. The supervisor and sweeper write into this; the
//! status endpoint reads it. Correctness never depends on it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view for the `/status` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Whether the upstream stream connection is currently up.
    pub connected: bool,
    /// Reconnect attempts consumed since the last successful connect.
    pub reconnect_attempts: u32,
    /// Completion time of the most recent successful sweep (the liveness
    /// heartbeat).
    pub last_sweep: Option<DateTime<Utc>>,
}

/// Lock-light shared state; atomics for the hot flags, a mutex only for
/// the heartbeat timestamp.
#[derive(Debug, Default)]
pub struct HealthState {
    connected: AtomicBool,
    reconnect_attempts: AtomicU32,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Consumes one reconnect attempt; returns the new count.
    pub fn bump_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Called after a successful connect.
    pub fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Liveness heartbeat, signalled after every successful sweep.
    pub fn notify_heartbeat(&self, at: DateTime<Utc>) {
        *self.last_sweep.lock().unwrap() = Some(at);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            connected: self.is_connected(),
            reconnect_attempts: self.reconnect_attempts(),
            last_sweep: *self.last_sweep.lock().unwrap(),
        }
    }
}
