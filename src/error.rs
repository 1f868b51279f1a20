//! # Dispatch Error Types
//!
//! Structured error handling for the offer protocol using thiserror.
//! Race-loss outcomes (`AlreadyAccepted`, `Expired`) are routine results a
//! caller must handle, not faults; `is_race_loss` distinguishes them from
//! genuine failures so the gateway can answer a losing porter without
//! logging an error.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the dispatch core.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A live dispatch round (accepted or unexpired pending offers) already
    /// exists for the job; no duplicate rounds may be opened.
    #[error("dispatch conflict for job {job_id}: {message}")]
    Conflict { job_id: Uuid, message: String },

    /// The accept race was lost: another offer for the same job won.
    #[error("offer {offer_id} can no longer be accepted: job already assigned")]
    AlreadyAccepted { offer_id: Uuid },

    /// The offer's TTL passed before the accept attempt landed.
    #[error("offer {offer_id} expired before acceptance")]
    Expired { offer_id: Uuid },

    /// No connected, eligible porter matched the job constraints.
    #[error("no eligible candidates for job {job_id}")]
    NoCandidates { job_id: Uuid },

    /// Redispatch rounds exhausted without an acceptance; escalate to the
    /// order system.
    #[error("dispatch exhausted for job {job_id} after {rounds} rounds")]
    DispatchExhausted { job_id: Uuid, rounds: u32 },

    #[error("offer not found: {offer_id}")]
    OfferNotFound { offer_id: Uuid },

    /// The caller is not the porter the offer was addressed to.
    #[error("offer {offer_id} does not belong to porter {porter_id}")]
    PorterMismatch { offer_id: Uuid, porter_id: Uuid },

    /// The requested lifecycle transition is not permitted from the offer's
    /// current state (terminal states are absorbing).
    #[error("invalid offer transition: {message}")]
    InvalidTransition { message: String },

    #[error("store error during {operation}: {message}")]
    Store { operation: String, message: String },

    #[error("messaging error: {0}")]
    Messaging(#[from] crate::messaging::MessagingError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("gateway error: {message}")]
    Gateway { message: String },
}

impl DispatchError {
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }

    /// True for the two expected accept-race outcomes. These are returned to
    /// porters as normal responses and must never be retried on the same
    /// offer.
    pub fn is_race_loss(&self) -> bool {
        matches!(self, Self::AlreadyAccepted { .. } | Self::Expired { .. })
    }

    /// True when the failure is transient (connectivity) and the operation
    /// may be retried with backoff at the call site.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { .. } => true,
            Self::Messaging(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store {
            operation: "query".to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
