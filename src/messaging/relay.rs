//! Event relay between the in-process publisher and the pgmq bus.
//!
//! Outbound: every event published locally (always after the store commit)
//! is forwarded to the bus with bounded exponential-backoff retries. A
//! publish that still fails after the bound is logged loudly and dropped
//! from the relay only; the store remains authoritative and consumers
//! recover by resync, so this is at-least-once delivery, never a
//! correctness violation.
//!
//! Inbound: polls the lifecycle queue, re-injects remote events into the
//! local publisher for gateway fan-out, then archives them.
//!
//! Every event carries the instance ID of the publisher plane it was first
//! published on. The relay uses it in both directions: outbound forwards
//! only events this replica originated, and inbound archives this replica's
//! own echoes without re-injecting them. Without that filter a re-injected
//! remote event would be forwarded back to the bus and circulate forever.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MessagingConfig;
use crate::events::{EventPublisher, OfferEventMessage};
use crate::messaging::PgmqOfferBus;

/// Exponential backoff for a 1-based retry attempt.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(1u32 << (attempt.saturating_sub(1)).min(10))
}

/// True when the event was first published by the plane with this instance
/// ID. Events from before the origin field existed deserialize with no
/// origin and are treated as remote.
fn originated_by(event: &OfferEventMessage, instance_id: Uuid) -> bool {
    event.origin == Some(instance_id)
}

/// Bridges the local event plane onto the distributed bus.
pub struct EventRelay {
    bus: Arc<PgmqOfferBus>,
    publisher: EventPublisher,
    config: MessagingConfig,
}

impl EventRelay {
    pub fn new(bus: Arc<PgmqOfferBus>, publisher: EventPublisher, config: MessagingConfig) -> Self {
        Self {
            bus,
            publisher,
            config,
        }
    }

    /// Forward locally published events to the bus until shutdown.
    pub async fn run_outbound(&self, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.publisher.subscribe();
        let instance_id = self.publisher.instance_id();
        info!("event relay (outbound) started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = rx.recv() => match received {
                    Ok(event) => {
                        // Re-injected remote events carry a foreign origin
                        // and must not loop back onto the bus.
                        if originated_by(&event, instance_id) {
                            self.publish_with_retry(&event).await;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // Dropped events are recoverable from the store.
                        warn!(skipped, "event relay lagged behind local publisher");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        info!("event relay (outbound) stopped");
    }

    /// Poll the bus and re-inject remote events into the local publisher
    /// until shutdown.
    pub async fn run_inbound(&self, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(Duration::from_millis(250));
        info!("event relay (inbound) started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = poll.tick() => {
                    if let Err(err) = self.drain_queue().await {
                        warn!(error = %err, "inbound relay read failed");
                    }
                }
            }
        }
        info!("event relay (inbound) stopped");
    }

    async fn drain_queue(&self) -> Result<(), crate::messaging::MessagingError> {
        let instance_id = self.publisher.instance_id();
        let messages = self.bus.read_batch(32).await?;
        for message in messages {
            // Our own echo read back from the bus; local subscribers
            // already saw it at publish time.
            if originated_by(&message.message, instance_id) {
                self.bus.archive(message.msg_id).await?;
                continue;
            }
            debug!(
                topic = %message.message.topic,
                msg_id = message.msg_id,
                "remote event received"
            );
            self.publisher.publish(message.message.clone());
            self.bus.archive(message.msg_id).await?;
        }
        Ok(())
    }

    async fn publish_with_retry(&self, event: &OfferEventMessage) {
        let base = self.config.publish_backoff();
        for attempt in 1..=self.config.max_publish_attempts {
            match self.bus.publish(event).await {
                Ok(_) => return,
                Err(err) if err.is_retryable() && attempt < self.config.max_publish_attempts => {
                    let delay = backoff_delay(attempt, base);
                    warn!(
                        topic = %event.topic,
                        job_id = %event.job_id,
                        attempt,
                        error = %err,
                        "bus publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        topic = %event.topic,
                        job_id = %event.job_id,
                        offer_id = %event.offer_id,
                        error = %err,
                        "bus publish abandoned; store remains authoritative"
                    );
                    return;
                }
            }
        }
    }
}
