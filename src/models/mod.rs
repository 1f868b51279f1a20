//! Data layer for the offer protocol: offers, assignments, and the offer
//! lifecycle state enum.

pub mod assignment;
pub mod offer;

pub use assignment::JobAssignment;
pub use offer::{JobOffer, OfferState};
