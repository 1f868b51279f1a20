//! In-process TTL presence registry backed by a concurrent map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::{ConnectionId, PresenceEntry, PresenceRegistry};
use crate::error::Result;

/// DashMap-backed presence registry with heartbeat TTL.
pub struct InMemoryPresenceRegistry {
    entries: DashMap<Uuid, PresenceEntry>,
    heartbeat_ttl: chrono::Duration,
}

impl InMemoryPresenceRegistry {
    pub fn new(heartbeat_ttl: chrono::Duration) -> Self {
        Self {
            entries: DashMap::new(),
            heartbeat_ttl,
        }
    }
}

#[async_trait]
impl PresenceRegistry for InMemoryPresenceRegistry {
    async fn register(&self, porter_id: Uuid, connection: ConnectionId) -> Result<()> {
        let now = Utc::now();
        self.entries
            .entry(porter_id)
            .and_modify(|entry| {
                if !entry.connections.contains(&connection) {
                    entry.connections.push(connection);
                }
                entry.last_heartbeat = now;
            })
            .or_insert_with(|| PresenceEntry {
                porter_id,
                connections: vec![connection],
                last_heartbeat: now,
            });
        debug!(porter_id = %porter_id, connection = %connection, "porter connected");
        Ok(())
    }

    async fn heartbeat(&self, porter_id: Uuid) -> Result<bool> {
        match self.entries.get_mut(&porter_id) {
            Some(mut entry) => {
                entry.last_heartbeat = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deregister(&self, porter_id: Uuid, connection: ConnectionId) -> Result<()> {
        let remove = match self.entries.get_mut(&porter_id) {
            Some(mut entry) => {
                entry.connections.retain(|c| *c != connection);
                entry.connections.is_empty()
            }
            None => false,
        };
        if remove {
            self.entries.remove(&porter_id);
            debug!(porter_id = %porter_id, "porter disconnected");
        }
        Ok(())
    }

    async fn connected_porters(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.is_fresh(now, self.heartbeat_ttl))
            .map(|entry| entry.porter_id)
            .collect())
    }

    async fn is_connected(&self, porter_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .entries
            .get(&porter_id)
            .map(|entry| entry.is_fresh(now, self.heartbeat_ttl))
            .unwrap_or(false))
    }

    async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.is_fresh(now, self.heartbeat_ttl));
        let removed = (before - self.entries.len()) as u64;
        if removed > 0 {
            debug!(removed, "stale presence entries swept");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InMemoryPresenceRegistry {
        InMemoryPresenceRegistry::new(chrono::Duration::seconds(45))
    }

    #[tokio::test]
    async fn register_and_query() {
        let registry = registry();
        let porter = Uuid::new_v4();
        registry.register(porter, Uuid::new_v4()).await.unwrap();

        let now = Utc::now();
        assert!(registry.is_connected(porter, now).await.unwrap());
        assert_eq!(registry.connected_porters(now).await.unwrap(), vec![porter]);
    }

    #[tokio::test]
    async fn entry_survives_until_last_connection_drops() {
        let registry = registry();
        let porter = Uuid::new_v4();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        registry.register(porter, c1).await.unwrap();
        registry.register(porter, c2).await.unwrap();

        registry.deregister(porter, c1).await.unwrap();
        assert!(registry.is_connected(porter, Utc::now()).await.unwrap());

        registry.deregister(porter, c2).await.unwrap();
        assert!(!registry.is_connected(porter, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn silent_porter_goes_stale_and_is_swept() {
        let registry = registry();
        let porter = Uuid::new_v4();
        registry.register(porter, Uuid::new_v4()).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(60);
        assert!(!registry.is_connected(porter, later).await.unwrap());
        assert!(registry.connected_porters(later).await.unwrap().is_empty());

        assert_eq!(registry.sweep_stale(later).await.unwrap(), 1);
        assert_eq!(registry.sweep_stale(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn heartbeat_refreshes_freshness() {
        let registry = registry();
        let porter = Uuid::new_v4();
        registry.register(porter, Uuid::new_v4()).await.unwrap();

        assert!(registry.heartbeat(porter).await.unwrap());
        assert!(!registry.heartbeat(Uuid::new_v4()).await.unwrap());
    }
}
