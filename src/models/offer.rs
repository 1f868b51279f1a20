//! # JobOffer Model
//!
//! One candidate assignment of a job to a porter, time-bounded by a TTL and
//! versioned for optimistic concurrency.
//!
//! ## Invariants
//!
//! - For a given job, at most one offer ever reaches `accepted`.
//! - Once any offer for a job is accepted, every sibling still `pending`
//!   transitions to `revoked`, and no further offers may be created for
//!   that job.
//! - The four non-pending states are absorbing; a terminal offer never
//!   transitions again.
//!
//! ## Database Schema
//!
//! Maps to `porter_offers`:
//! - `offer_id` UUID primary key
//! - `job_id`, `porter_id` UUID, indexed together
//! - `state` TEXT, one of the [`OfferState`] wire names
//! - `version` INTEGER, bumped by every successful conditional update
//! - `created_at`, `expires_at` TIMESTAMPTZ

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Offer lifecycle states. `Pending` is the only non-absorbing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferState {
    /// Offer is live and awaiting the porter's decision
    Pending,
    /// The porter won the accept race; job is assigned
    Accepted,
    /// A sibling offer was accepted, or the job was cancelled
    Revoked,
    /// TTL elapsed before any decision
    Expired,
    /// The porter turned the offer down
    Declined,
}

impl OfferState {
    /// Terminal states are absorbing: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Revoked => write!(f, "revoked"),
            Self::Expired => write!(f, "expired"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

impl std::str::FromStr for OfferState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            "declined" => Ok(Self::Declined),
            _ => Err(format!("Invalid offer state: {s}")),
        }
    }
}

/// A time-bounded proposal of a job to one porter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOffer {
    pub offer_id: Uuid,
    pub job_id: Uuid,
    pub porter_id: Uuid,
    pub state: OfferState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Optimistic concurrency token; every successful conditional update
    /// bumps it.
    pub version: i32,
}

impl JobOffer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Live means pending and unexpired: the offer still counts toward an
    /// open dispatch round.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.state == OfferState::Pending && !self.is_expired(now)
    }
}
