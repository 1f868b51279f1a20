//! Per-offer lifecycle transition table.
//!
//! `Pending -> {Accepted, Revoked, Expired, Declined}`; all four targets are
//! absorbing. The Postgres store encodes this table in its conditional
//! UPDATE predicates; the in-memory store calls it directly so both enforce
//! the same machine.

use crate::error::{DispatchError, Result};
use crate::models::OfferState;

/// Events that drive an offer's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferEvent {
    Accept,
    Decline,
    Revoke,
    Expire,
}

/// Determine the target state for an event, rejecting any transition out of
/// an absorbing state.
pub fn target_state(current: OfferState, event: OfferEvent) -> Result<OfferState> {
    match (current, event) {
        (OfferState::Pending, OfferEvent::Accept) => Ok(OfferState::Accepted),
        (OfferState::Pending, OfferEvent::Decline) => Ok(OfferState::Declined),
        (OfferState::Pending, OfferEvent::Revoke) => Ok(OfferState::Revoked),
        (OfferState::Pending, OfferEvent::Expire) => Ok(OfferState::Expired),
        (from, event) => Err(DispatchError::invalid_transition(format!(
            "cannot apply {event:?} to offer in state {from}"
        ))),
    }
}
