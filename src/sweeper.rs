//! # Expiry Sweeper
//!
//! Interval-driven background task that runs the idempotent expiry sweep
//! and feeds "needs redispatch" jobs back into the broadcaster. Multiple
//! sweeper instances may run concurrently; the store's conditional
//! transition makes the sweep itself race-free.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::dispatch::DispatchBroadcaster;
use crate::error::{DispatchError, Result};
use crate::offers::OfferManager;
use crate::store::ExpirySweep;

pub struct ExpirySweeper {
    manager: OfferManager,
    broadcaster: Arc<DispatchBroadcaster>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        manager: OfferManager,
        broadcaster: Arc<DispatchBroadcaster>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            broadcaster,
            interval,
        }
    }

    /// Sweep on the configured interval until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_ms = self.interval.as_millis() as u64, "expiry sweeper started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        error!(error = %err, "expiry sweep failed");
                    }
                }
            }
        }
        info!("expiry sweeper stopped");
    }

    /// One sweep + redispatch pass. Exposed for tests and manual runs.
    pub async fn sweep_once(&self) -> Result<ExpirySweep> {
        let sweep = self.manager.expire_offers(Utc::now()).await?;

        if !sweep.needs_redispatch.is_empty() {
            let failures = self.broadcaster.handle_sweep(&sweep).await;
            for (job_id, err) in failures {
                match err {
                    DispatchError::DispatchExhausted { rounds, .. } => {
                        // Escalation belongs to the order system; this core
                        // just stops trying.
                        warn!(job_id = %job_id, rounds, "dispatch exhausted, escalating");
                        self.broadcaster.forget_job(job_id);
                    }
                    other => {
                        warn!(job_id = %job_id, error = %other, "redispatch deferred");
                    }
                }
            }
        }
        Ok(sweep)
    }
}
