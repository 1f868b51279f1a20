//! Per-porter connection registry for point-to-point delivery.
//!
//! Events are addressed by porter ID, never broadcast to all sockets. Each
//! connection owns an unbounded channel drained by its socket writer task;
//! a porter with several connections receives every frame on each.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::gateway::messages::ServerMessage;
use crate::presence::ConnectionId;

type Sender = mpsc::UnboundedSender<ServerMessage>;

#[derive(Default)]
pub struct ConnectionRegistry {
    by_porter: DashMap<Uuid, Vec<(ConnectionId, Sender)>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, porter_id: Uuid, connection: ConnectionId, sender: Sender) {
        self.by_porter
            .entry(porter_id)
            .or_default()
            .push((connection, sender));
    }

    pub fn remove(&self, porter_id: Uuid, connection: ConnectionId) {
        let empty = match self.by_porter.get_mut(&porter_id) {
            Some(mut senders) => {
                senders.retain(|(id, _)| *id != connection);
                senders.is_empty()
            }
            None => false,
        };
        if empty {
            self.by_porter.remove(&porter_id);
        }
    }

    /// Deliver a frame to every live connection of the porter; returns how
    /// many sockets took it.
    pub fn send_to_porter(&self, porter_id: Uuid, message: &ServerMessage) -> usize {
        match self.by_porter.get(&porter_id) {
            Some(senders) => senders
                .iter()
                .filter(|(_, sender)| sender.send(message.clone()).is_ok())
                .count(),
            None => 0,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.by_porter.iter().map(|e| e.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_is_point_to_point() {
        let registry = ConnectionRegistry::new();
        let (porter_a, porter_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register(porter_a, Uuid::new_v4(), tx_a);
        registry.register(porter_b, Uuid::new_v4(), tx_b);

        let frame = ServerMessage::OfferRevoked {
            offer_id: Uuid::new_v4(),
        };
        assert_eq!(registry.send_to_porter(porter_a, &frame), 1);

        assert_eq!(rx_a.try_recv().unwrap(), frame);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn removal_drops_empty_entries() {
        let registry = ConnectionRegistry::new();
        let porter = Uuid::new_v4();
        let connection = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(porter, connection, tx);
        assert_eq!(registry.connection_count(), 1);

        registry.remove(porter, connection);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(
            registry.send_to_porter(
                porter,
                &ServerMessage::OfferRevoked {
                    offer_id: Uuid::new_v4()
                }
            ),
            0
        );
    }
}
