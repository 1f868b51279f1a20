//! Bus payloads for offer lifecycle events.
//!
//! Every event carries the job/offer/porter identity triple plus timestamp
//! and the offer version after the transition. Events for the same job are
//! published in transition order and partitioned by job ID on the bus, so
//! per-job ordering survives fan-out; no ordering is guaranteed across jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::JobOffer;

/// Bus topics for the offer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferTopic {
    Created,
    Accepted,
    Revoked,
    Expired,
}

impl OfferTopic {
    /// Abstract topic name as exposed on the bus.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "offers.created",
            Self::Accepted => "offers.accepted",
            Self::Revoked => "offers.revoked",
            Self::Expired => "offers.expired",
        }
    }
}

impl fmt::Display for OfferTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One offer lifecycle event as carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferEventMessage {
    pub topic: OfferTopic,
    /// Bus partition key: per-job ordering is guaranteed, cross-job is not.
    pub job_id: Uuid,
    pub offer_id: Uuid,
    pub porter_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Offer version after the transition that produced this event.
    pub version: i32,
    /// Identity of the publisher plane the event was first published on.
    /// Stamped at publish time and carried across the bus so a relay can
    /// tell its own publications from re-injected remote ones.
    #[serde(default)]
    pub origin: Option<Uuid>,
}

impl OfferEventMessage {
    pub fn for_offer(topic: OfferTopic, offer: &JobOffer) -> Self {
        Self {
            topic,
            job_id: offer.job_id,
            offer_id: offer.offer_id,
            porter_id: offer.porter_id,
            timestamp: Utc::now(),
            version: offer.version,
            origin: None,
        }
    }
}
