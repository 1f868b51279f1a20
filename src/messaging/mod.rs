//! Distributed event transport: pgmq-backed bus client and the relay that
//! bridges the in-process publisher to it with at-least-once semantics.

pub mod bus;
pub mod errors;
pub mod relay;

pub use bus::{offer_queue_name, PgmqOfferBus};
pub use errors::MessagingError;
pub use relay::EventRelay;
