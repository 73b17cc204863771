//! LedgerSweeper processor.
//!
//! Periodically removes expired entries from the idempotency ledger so the
//! in-memory store stays bounded and the `processed_events` table does not
//! accumulate rows.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::idempotency::IdempotencyLedger;

pub struct LedgerSweeper {
    ledger: IdempotencyLedger,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl LedgerSweeper {
    pub fn new(
        ledger: IdempotencyLedger,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ledger,
            interval,
            shutdown_rx,
        }
    }

    /// Run the LedgerSweeper until shutdown is signaled.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "LedgerSweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing has expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                Ok(()) = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("LedgerSweeper received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.ledger.sweep().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "Purged expired ledger entries"),
                        Err(e) => warn!(error = %e, "Failed to purge expired ledger entries"),
                    }
                }
            }
        }

        info!("LedgerSweeper shutdown complete");
    }
}
