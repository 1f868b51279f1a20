//! In-memory offer store.
//!
//! Mirrors the conditional-update semantics of the Postgres store behind a
//! single mutex, which stands in for the database's atomicity within one
//! process. Used by the test suites and by single-process embeddings; it is
//! not a durable store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{AcceptOutcome, DeclineOutcome, ExpirySweep, OfferStore};
use crate::error::{DispatchError, Result};
use crate::models::{JobAssignment, JobOffer, OfferState};
use crate::offers::lifecycle::{self, OfferEvent};

#[derive(Default)]
struct MemoryState {
    offers: HashMap<Uuid, JobOffer>,
    /// Offer IDs per job in insertion order.
    job_index: HashMap<Uuid, Vec<Uuid>>,
    assignments: HashMap<Uuid, JobAssignment>,
}

/// Mutex-guarded offer store with the same CAS semantics as Postgres.
#[derive(Default)]
pub struct InMemoryOfferStore {
    state: Mutex<MemoryState>,
}

impl InMemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn classify_non_pending(offer: &JobOffer) -> DispatchError {
        match offer.state {
            OfferState::Accepted | OfferState::Revoked => DispatchError::AlreadyAccepted {
                offer_id: offer.offer_id,
            },
            OfferState::Expired => DispatchError::Expired {
                offer_id: offer.offer_id,
            },
            OfferState::Declined => DispatchError::invalid_transition(format!(
                "offer {} was already declined",
                offer.offer_id
            )),
            OfferState::Pending => unreachable!("classify_non_pending called on pending offer"),
        }
    }

    fn job_has_pending(state: &MemoryState, job_id: Uuid) -> bool {
        state
            .job_index
            .get(&job_id)
            .map(|ids| {
                ids.iter().any(|id| {
                    state
                        .offers
                        .get(id)
                        .is_some_and(|o| o.state == OfferState::Pending)
                })
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl OfferStore for InMemoryOfferStore {
    async fn insert_offers(
        &self,
        job_id: Uuid,
        porter_ids: &[Uuid],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobOffer>> {
        let mut state = self.state.lock();

        if state.assignments.contains_key(&job_id) {
            return Err(DispatchError::Conflict {
                job_id,
                message: "job already assigned".to_string(),
            });
        }
        if let Some(ids) = state.job_index.get(&job_id) {
            for id in ids {
                let offer = &state.offers[id];
                if offer.state == OfferState::Accepted || offer.is_live(now) {
                    return Err(DispatchError::Conflict {
                        job_id,
                        message: format!("live dispatch round: offer {} is {}", id, offer.state),
                    });
                }
            }
        }

        let mut created = Vec::with_capacity(porter_ids.len());
        for porter_id in porter_ids {
            let offer = JobOffer {
                offer_id: Uuid::new_v4(),
                job_id,
                porter_id: *porter_id,
                state: OfferState::Pending,
                created_at: now,
                expires_at,
                version: 1,
            };
            state
                .job_index
                .entry(job_id)
                .or_default()
                .push(offer.offer_id);
            state.offers.insert(offer.offer_id, offer.clone());
            created.push(offer);
        }
        Ok(created)
    }

    async fn accept_offer(
        &self,
        offer_id: Uuid,
        porter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome> {
        let mut state = self.state.lock();

        let offer = state
            .offers
            .get(&offer_id)
            .cloned()
            .ok_or(DispatchError::OfferNotFound { offer_id })?;

        if offer.porter_id != porter_id {
            return Err(DispatchError::PorterMismatch {
                offer_id,
                porter_id,
            });
        }
        if offer.state != OfferState::Pending {
            return Err(Self::classify_non_pending(&offer));
        }
        if offer.is_expired(now) {
            return Err(DispatchError::Expired { offer_id });
        }
        if state.assignments.contains_key(&offer.job_id) {
            return Err(DispatchError::AlreadyAccepted { offer_id });
        }

        // The mutex makes the state check and mutation one atomic step, the
        // in-process equivalent of the conditional UPDATE.
        let accepted_state = lifecycle::target_state(offer.state, OfferEvent::Accept)?;
        let accepted = {
            let entry = state.offers.get_mut(&offer_id).expect("offer present");
            entry.state = accepted_state;
            entry.version += 1;
            entry.clone()
        };

        let sibling_ids: Vec<Uuid> = state
            .job_index
            .get(&offer.job_id)
            .map(|ids| ids.iter().copied().filter(|id| *id != offer_id).collect())
            .unwrap_or_default();
        let mut revoked_siblings = Vec::new();
        for sibling_id in sibling_ids {
            let sibling = state.offers.get_mut(&sibling_id).expect("offer present");
            if sibling.state == OfferState::Pending {
                sibling.state = OfferState::Revoked;
                sibling.version += 1;
                revoked_siblings.push(sibling.clone());
            }
        }

        let assignment = JobAssignment {
            job_id: offer.job_id,
            porter_id,
            offer_id,
            accepted_at: now,
        };
        state.assignments.insert(offer.job_id, assignment.clone());

        Ok(AcceptOutcome {
            assignment,
            accepted,
            revoked_siblings,
        })
    }

    async fn decline_offer(
        &self,
        offer_id: Uuid,
        porter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DeclineOutcome> {
        let mut state = self.state.lock();

        let offer = state
            .offers
            .get(&offer_id)
            .cloned()
            .ok_or(DispatchError::OfferNotFound { offer_id })?;

        if offer.porter_id != porter_id {
            return Err(DispatchError::PorterMismatch {
                offer_id,
                porter_id,
            });
        }
        if offer.state != OfferState::Pending {
            return Err(Self::classify_non_pending(&offer));
        }
        if offer.is_expired(now) {
            return Err(DispatchError::Expired { offer_id });
        }

        let declined_state = lifecycle::target_state(offer.state, OfferEvent::Decline)?;
        let declined = {
            let entry = state.offers.get_mut(&offer_id).expect("offer present");
            entry.state = declined_state;
            entry.version += 1;
            entry.clone()
        };

        let needs_redispatch = !state.assignments.contains_key(&offer.job_id)
            && !Self::job_has_pending(&state, offer.job_id);

        Ok(DeclineOutcome {
            offer: declined,
            needs_redispatch,
        })
    }

    async fn expire_due_offers(&self, now: DateTime<Utc>) -> Result<ExpirySweep> {
        let mut state = self.state.lock();

        let due: Vec<Uuid> = state
            .offers
            .values()
            .filter(|o| o.state == OfferState::Pending && o.is_expired(now))
            .map(|o| o.offer_id)
            .collect();

        let mut expired = Vec::new();
        for offer_id in due {
            let entry = state.offers.get_mut(&offer_id).expect("offer present");
            entry.state = OfferState::Expired;
            entry.version += 1;
            expired.push(entry.clone());
        }

        let mut touched_jobs: Vec<Uuid> = expired.iter().map(|o| o.job_id).collect();
        touched_jobs.sort();
        touched_jobs.dedup();

        let needs_redispatch = touched_jobs
            .into_iter()
            .filter(|job_id| {
                !state.assignments.contains_key(job_id) && !Self::job_has_pending(&state, *job_id)
            })
            .collect();

        Ok(ExpirySweep {
            expired,
            needs_redispatch,
        })
    }

    async fn cancel_job_offers(&self, job_id: Uuid) -> Result<Vec<JobOffer>> {
        let mut state = self.state.lock();

        let ids: Vec<Uuid> = state
            .job_index
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        let mut revoked = Vec::new();
        for offer_id in ids {
            let entry = state.offers.get_mut(&offer_id).expect("offer present");
            if entry.state == OfferState::Pending {
                entry.state = OfferState::Revoked;
                entry.version += 1;
                revoked.push(entry.clone());
            }
        }
        Ok(revoked)
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<JobOffer>> {
        Ok(self.state.lock().offers.get(&offer_id).cloned())
    }

    async fn offers_for_job(&self, job_id: Uuid) -> Result<Vec<JobOffer>> {
        let state = self.state.lock();
        Ok(state
            .job_index
            .get(&job_id)
            .map(|ids| ids.iter().filter_map(|id| state.offers.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn assignment_for_job(&self, job_id: Uuid) -> Result<Option<JobAssignment>> {
        Ok(self.state.lock().assignments.get(&job_id).cloned())
    }

    async fn pending_offer_count(&self, porter_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let state = self.state.lock();
        Ok(state
            .offers
            .values()
            .filter(|o| o.porter_id == porter_id && o.is_live(now))
            .count() as u64)
    }
}
