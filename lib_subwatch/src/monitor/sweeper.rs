//! # Periodic Sweeper
//!
//! A timer-driven task that deactivates lapsed subscription windows and
//! signals the liveness heartbeat after every successful pass. A failed
//! sweep is logged and left for the next scheduled tick, never retried in
//! a tight loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ledger::SubscriptionLedger;
use crate::monitor::health::HealthState;

/// Sweeps on a fixed interval (default hourly) until cancelled. The first
/// pass runs immediately at startup to clear anything that lapsed while
/// the process was down.
pub struct PeriodicSweeper<L> {
    ledger: L,
    interval: Duration,
    health: Arc<HealthState>,
    shutdown: CancellationToken,
}

impl<L: SubscriptionLedger> PeriodicSweeper<L> {
    pub fn new(
        ledger: L,
        interval: Duration,
        health: Arc<HealthState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            interval,
            health,
            shutdown,
        }
    }

    /// Runs until the shutdown token is cancelled.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("sweeper stopped");
                    return;
                }
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    async fn sweep_once(&self) {
        let now = Utc::now();
        match self.ledger.sweep_expired(now).await {
            Ok(affected) => {
                if affected.is_empty() {
                    tracing::debug!("sweep found nothing to deactivate");
                } else {
                    tracing::info!(
                        count = affected.len(),
                        usernames = ?affected,
                        "deactivated lapsed subscriptions"
                    );
                }
                self.health.notify_heartbeat(now);
            }
            Err(e) => {
                tracing::warn!(error = %e, "sweep failed; deferring to next tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use chrono::Duration as ChronoDuration;

    #[tokio::test(start_paused = true)]
    async fn sweep_deactivates_and_heartbeats() {
        let ledger = MemoryLedger::new();
        ledger.grant("lapsed", 30).await.unwrap();
        ledger.grant("current", 30).await.unwrap();
        ledger.force_expiration("lapsed", Utc::now() - ChronoDuration::days(1));

        let health = Arc::new(HealthState::new());
        let shutdown = CancellationToken::new();
        let sweeper = PeriodicSweeper::new(
            ledger.clone(),
            Duration::from_secs(3600),
            health.clone(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(sweeper.run());

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!ledger.lookup("lapsed").await.unwrap().unwrap().active);
        assert!(ledger.lookup("current").await.unwrap().unwrap().active);
        assert!(health.snapshot().last_sweep.is_some());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_defers_to_next_tick() {
        let ledger = MemoryLedger::new();
        ledger.grant("lapsed", 30).await.unwrap();
        ledger.force_expiration("lapsed", Utc::now() - ChronoDuration::days(1));
        ledger.fail_next(1);

        let health = Arc::new(HealthState::new());
        let shutdown = CancellationToken::new();
        let sweeper = PeriodicSweeper::new(
            ledger.clone(),
            Duration::from_secs(3600),
            health.clone(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(sweeper.run());

        // First tick fails; no heartbeat, record untouched.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(health.snapshot().last_sweep.is_none());
        assert!(ledger.lookup("lapsed").await.unwrap().unwrap().active);

        // Next tick an hour later succeeds.
        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(health.snapshot().last_sweep.is_some());
        assert!(!ledger.lookup("lapsed").await.unwrap().unwrap().active);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
