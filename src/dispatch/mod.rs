//! Candidate selection and dispatch fan-out: eligibility filtering over
//! presence, pluggable ranking, bounded redispatch rounds.

pub mod broadcaster;
pub mod eligibility;
pub mod ranking;

pub use broadcaster::{DispatchBroadcaster, DispatchResult};
pub use eligibility::{
    EligibilitySnapshot, GeoPoint, InMemoryPorterDirectory, JobConstraints, PorterDirectory,
    PorterProfile,
};
pub use ranking::{ProximityRatingPolicy, RankingPolicy};
