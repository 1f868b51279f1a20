//! # Presence Registry
//!
//! Tracks which porters are currently connected and reachable for realtime
//! delivery. Entries are ephemeral: they live in a TTL-capable volatile
//! store, expire when heartbeats stop, and are never persisted. Each entry
//! is owned by the gateway instance that created it; the offer manager and
//! broadcaster only read presence, never mutate it.

pub mod memory;

pub use memory::InMemoryPresenceRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;

/// Identifier of one live gateway connection.
pub type ConnectionId = Uuid;

/// Ephemeral record of a porter's reachability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub porter_id: Uuid,
    /// A porter may hold several simultaneous connections (e.g. phone and
    /// tablet); any live one makes them reachable.
    pub connections: Vec<ConnectionId>,
    pub last_heartbeat: DateTime<Utc>,
}

impl PresenceEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_heartbeat < ttl
    }
}

/// Shared, TTL-capable registry of connected porters.
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Register a connection for the porter and stamp the heartbeat.
    async fn register(&self, porter_id: Uuid, connection: ConnectionId) -> Result<()>;

    /// Refresh the porter's heartbeat. Returns false when no entry exists
    /// (the porter must reconnect).
    async fn heartbeat(&self, porter_id: Uuid) -> Result<bool>;

    /// Remove one connection; the entry disappears with its last connection.
    async fn deregister(&self, porter_id: Uuid, connection: ConnectionId) -> Result<()>;

    /// Porters with at least one connection and a fresh heartbeat.
    async fn connected_porters(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    async fn is_connected(&self, porter_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Drop entries whose heartbeat exceeded the TTL; returns how many were
    /// removed. Safe to run from multiple sweepers.
    async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<u64>;
}
