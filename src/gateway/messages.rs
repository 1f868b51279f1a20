//! Wire contract between the gateway and porter clients.
//!
//! JSON frames tagged by `type`. Server→client: `offer.new`,
//! `offer.revoked`, `offer.assigned`. Client→server: `porter.hello`,
//! `heartbeat`, `offer.accept`, `offer.decline`; accept/decline are
//! answered synchronously with an `ack` carrying
//! `ok | already_accepted | expired`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

/// Frames a porter client sends to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First frame on every connection; the credential is verified by the
    /// platform's authenticator, not by this core.
    #[serde(rename = "porter.hello")]
    Hello { porter_id: Uuid, credential: String },

    #[serde(rename = "heartbeat")]
    Heartbeat,

    #[serde(rename = "offer.accept")]
    AcceptOffer { offer_id: Uuid },

    #[serde(rename = "offer.decline")]
    DeclineOffer { offer_id: Uuid },
}

/// Frames the gateway pushes to a porter client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "offer.new")]
    OfferNew {
        offer_id: Uuid,
        job_id: Uuid,
        details: serde_json::Value,
        expires_at: DateTime<Utc>,
    },

    /// The offer is no longer available (a sibling won, the job was
    /// cancelled, or the TTL passed).
    #[serde(rename = "offer.revoked")]
    OfferRevoked { offer_id: Uuid },

    /// Confirmation to the winning porter.
    #[serde(rename = "offer.assigned")]
    OfferAssigned { offer_id: Uuid, job_id: Uuid },

    #[serde(rename = "ack")]
    Ack { status: AckStatus },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Synchronous response statuses for accept/decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    AlreadyAccepted,
    Expired,
}

impl AckStatus {
    /// Map an accept/decline outcome to a wire status; non-race errors have
    /// no ack status and surface as `error` frames instead.
    pub fn from_error(err: &DispatchError) -> Option<Self> {
        match err {
            DispatchError::AlreadyAccepted { .. } => Some(Self::AlreadyAccepted),
            DispatchError::Expired { .. } => Some(Self::Expired),
            _ => None,
        }
    }
}
