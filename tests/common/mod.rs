//! Shared harness for integration tests: a fully wired in-memory stack
//! (store, publisher, presence, directory, broadcaster).
#![allow(dead_code)]

use std::sync::Arc;

use dispatch_core::config::{DispatchPolicyConfig, OffersConfig};
use dispatch_core::dispatch::{
    DispatchBroadcaster, GeoPoint, InMemoryPorterDirectory, PorterProfile, ProximityRatingPolicy,
};
use dispatch_core::events::EventPublisher;
use dispatch_core::offers::OfferManager;
use dispatch_core::presence::{InMemoryPresenceRegistry, PresenceRegistry};
use dispatch_core::store::InMemoryOfferStore;
use uuid::Uuid;

pub struct Harness {
    pub manager: OfferManager,
    pub presence: Arc<InMemoryPresenceRegistry>,
    pub directory: Arc<InMemoryPorterDirectory>,
    pub broadcaster: Arc<DispatchBroadcaster>,
}

pub fn harness() -> Harness {
    harness_with(OffersConfig::default(), DispatchPolicyConfig::default())
}

pub fn harness_with(offers: OffersConfig, dispatch: DispatchPolicyConfig) -> Harness {
    let publisher = EventPublisher::default();
    let manager = OfferManager::new(Arc::new(InMemoryOfferStore::new()), publisher, offers);
    let presence = Arc::new(InMemoryPresenceRegistry::new(chrono::Duration::seconds(45)));
    let directory = Arc::new(InMemoryPorterDirectory::new());
    let broadcaster = Arc::new(DispatchBroadcaster::new(
        manager.clone(),
        presence.clone() as Arc<dyn PresenceRegistry>,
        directory.clone(),
        Arc::new(ProximityRatingPolicy),
        dispatch,
    ));
    Harness {
        manager,
        presence,
        directory,
        broadcaster,
    }
}

impl Harness {
    /// Register a connected, eligible porter and return its ID.
    pub async fn connected_porter(&self, rating: f64, location: Option<GeoPoint>) -> Uuid {
        let porter_id = Uuid::new_v4();
        self.directory.upsert(PorterProfile {
            porter_id,
            vehicle_type: "van".to_string(),
            capacity_kg: 500.0,
            active: true,
            suspended: false,
            rating,
            location,
        });
        self.presence
            .register(porter_id, Uuid::new_v4())
            .await
            .unwrap();
        porter_id
    }
}
