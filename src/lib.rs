#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Dispatch Core
//!
//! Race-safe offer/acceptance core for matching delivery and moving jobs to
//! porters in real time.
//!
//! ## Overview
//!
//! The platform around this crate creates orders, renders state, and owns
//! users and billing; this crate owns the hard part: guaranteeing that a
//! job is accepted by exactly one porter even when many porters race to
//! accept concurrently across replicated processes, while offers expire on
//! a TTL and every party sees lifecycle changes in real time.
//!
//! ## Architecture
//!
//! - [`store`] - durable offer/assignment record; conditional-update accept
//! - [`offers`] - the protocol engine: create, accept, decline, expire, cancel
//! - [`dispatch`] - eligibility, pluggable ranking, bounded redispatch
//! - [`presence`] - TTL registry of connected porters
//! - [`gateway`] - WebSocket fan-out and accept/decline relay
//! - [`events`] / [`messaging`] - in-process publisher and pgmq bus
//! - [`config`] / [`logging`] / [`error`] - ambient plumbing
//!
//! ## Exclusivity
//!
//! Acceptance is serialized only by the store's atomic compare-and-set on
//! the offer row (state + version + TTL + porter match), with sibling
//! revocation and assignment creation in the same transaction. No
//! in-process lock participates, so any number of replicas can race safely;
//! losers receive typed `AlreadyAccepted`/`Expired` outcomes rather than
//! faults.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dispatch_core::config::OffersConfig;
//! use dispatch_core::events::EventPublisher;
//! use dispatch_core::offers::OfferManager;
//! use dispatch_core::store::InMemoryOfferStore;
//!
//! # async fn example() -> dispatch_core::Result<()> {
//! let manager = OfferManager::new(
//!     Arc::new(InMemoryOfferStore::new()),
//!     EventPublisher::default(),
//!     OffersConfig::default(),
//! );
//!
//! let job_id = uuid::Uuid::new_v4();
//! let porters = vec![uuid::Uuid::new_v4(), uuid::Uuid::new_v4()];
//! let offers = manager.create_offers(job_id, &porters, None).await?;
//! let assignment = manager.accept_offer(offers[0].offer_id, porters[0]).await?;
//! assert_eq!(assignment.porter_id, porters[0]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod offers;
pub mod presence;
pub mod store;
pub mod sweeper;

pub use config::DispatchConfig;
pub use dispatch::{DispatchBroadcaster, DispatchResult};
pub use error::{DispatchError, Result};
pub use events::{EventPublisher, OfferEventMessage, OfferTopic};
pub use gateway::RealtimeGateway;
pub use models::{JobAssignment, JobOffer, OfferState};
pub use offers::OfferManager;
pub use presence::{PresenceEntry, PresenceRegistry};
pub use store::{InMemoryOfferStore, OfferStore, PgOfferStore};
pub use sweeper::ExpirySweeper;
