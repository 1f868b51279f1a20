//! Offer lifecycle event plane: typed bus payloads and the in-process
//! broadcast publisher the gateway fans out from.

pub mod messages;
pub mod publisher;

pub use messages::{OfferEventMessage, OfferTopic};
pub use publisher::EventPublisher;
