//! The offer protocol engine: lifecycle state machine plus the manager that
//! drives it against the store and event plane.

pub mod lifecycle;
pub mod manager;

pub use manager::OfferManager;
