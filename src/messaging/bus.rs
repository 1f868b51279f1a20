//! pgmq-backed offer event bus.
//!
//! A single queue carries every lifecycle topic; the topic travels in the
//! payload. Keeping all events for a job in one stream means a consumer
//! never observes a revocation before the creation it cancels, since pgmq
//! preserves enqueue order within a queue and events are enqueued in the
//! order the publisher emitted them.

use pgmq::{types::Message, PGMQueue};
use tracing::{debug, info};

use crate::config::MessagingConfig;
use crate::events::OfferEventMessage;
use crate::messaging::MessagingError;

/// Name of the lifecycle queue for a given prefix.
pub fn offer_queue_name(prefix: &str) -> String {
    format!("{prefix}_offer_events")
}

/// Bus client over pgmq for cross-replica event propagation.
#[derive(Clone)]
pub struct PgmqOfferBus {
    pgmq: PGMQueue,
    config: MessagingConfig,
}

impl PgmqOfferBus {
    /// Connect with a fresh pool from a connection string.
    pub async fn new(database_url: &str, config: MessagingConfig) -> Result<Self, MessagingError> {
        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        info!("connected to pgmq offer bus");
        Ok(Self { pgmq, config })
    }

    /// Reuse an existing connection pool.
    pub async fn new_with_pool(pool: sqlx::PgPool, config: MessagingConfig) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq, config }
    }

    pub fn queue_name(&self) -> String {
        offer_queue_name(&self.config.queue_prefix)
    }

    /// Create the lifecycle queue if absent.
    pub async fn ensure_queue(&self) -> Result<(), MessagingError> {
        let queue = self.queue_name();
        self.pgmq
            .create(&queue)
            .await
            .map_err(|e| MessagingError::queue_operation(&queue, "create", e.to_string()))?;
        debug!(queue = %queue, "offer bus queue ready");
        Ok(())
    }

    /// Publish one committed lifecycle event.
    pub async fn publish(&self, event: &OfferEventMessage) -> Result<i64, MessagingError> {
        let queue = self.queue_name();
        let message_id = self
            .pgmq
            .send(&queue, event)
            .await
            .map_err(|e| MessagingError::queue_operation(&queue, "send", e.to_string()))?;
        debug!(queue = %queue, message_id, topic = %event.topic, job_id = %event.job_id, "event published to bus");
        Ok(message_id)
    }

    /// Read a batch with the configured visibility timeout. Messages left
    /// unarchived become visible again, which is what gives consumers
    /// at-least-once delivery.
    pub async fn read_batch(
        &self,
        limit: i32,
    ) -> Result<Vec<Message<OfferEventMessage>>, MessagingError> {
        let queue = self.queue_name();
        let messages = self
            .pgmq
            .read_batch::<OfferEventMessage>(
                &queue,
                Some(self.config.visibility_timeout_seconds),
                limit,
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&queue, "read_batch", e.to_string()))?
            .unwrap_or_default();
        Ok(messages)
    }

    /// Archive a delivered message.
    pub async fn archive(&self, message_id: i64) -> Result<(), MessagingError> {
        let queue = self.queue_name();
        self.pgmq
            .archive(&queue, message_id)
            .await
            .map_err(|e| MessagingError::queue_operation(&queue, "archive", e.to_string()))?;
        Ok(())
    }
}
