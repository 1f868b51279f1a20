//! In-process broadcast publisher for offer lifecycle events.
//!
//! The gateway subscribes here for fan-out to connected porters; the
//! messaging relay subscribes here to mirror committed events onto the
//! distributed bus. Publication happens only after the store transaction
//! commits, so the store stays authoritative and a dropped event is
//! recoverable by resync.

use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::events::OfferEventMessage;

/// High-throughput publisher for offer lifecycle events.
///
/// Each publisher plane carries an instance ID. Events published without an
/// origin are stamped with it; events re-injected off the bus keep their
/// remote origin, which is how the relay tells the two apart.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<OfferEventMessage>,
    instance_id: Uuid,
}

impl EventPublisher {
    /// Create a publisher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            instance_id: Uuid::new_v4(),
        }
    }

    /// Identity of this publisher plane; clones share it.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Publish an event to all current subscribers, stamping this plane's
    /// instance ID as the origin unless the event already carries one.
    ///
    /// A send with no subscribers is not an error: events are still valid
    /// when no gateway or relay is attached (e.g. in offline tooling).
    pub fn publish(&self, mut event: OfferEventMessage) {
        if event.origin.is_none() {
            event.origin = Some(self.instance_id);
        }
        trace!(topic = %event.topic, job_id = %event.job_id, "publishing offer event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OfferEventMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OfferTopic;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(topic: OfferTopic, job_id: Uuid) -> OfferEventMessage {
        OfferEventMessage {
            topic,
            job_id,
            offer_id: Uuid::new_v4(),
            porter_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            version: 1,
            origin: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_publication_order() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();

        let job_id = Uuid::new_v4();
        publisher.publish(event(OfferTopic::Created, job_id));
        publisher.publish(event(OfferTopic::Revoked, job_id));

        assert_eq!(rx.recv().await.unwrap().topic, OfferTopic::Created);
        assert_eq!(rx.recv().await.unwrap().topic, OfferTopic::Revoked);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::new(4);
        publisher.publish(event(OfferTopic::Expired, Uuid::new_v4()));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn local_events_are_stamped_and_remote_origins_preserved() {
        let publisher = EventPublisher::new(4);
        let mut rx = publisher.subscribe();

        publisher.publish(event(OfferTopic::Created, Uuid::new_v4()));
        assert_eq!(
            rx.recv().await.unwrap().origin,
            Some(publisher.instance_id())
        );

        let remote_plane = Uuid::new_v4();
        let mut remote = event(OfferTopic::Created, Uuid::new_v4());
        remote.origin = Some(remote_plane);
        publisher.publish(remote);
        assert_eq!(rx.recv().await.unwrap().origin, Some(remote_plane));
    }
}
