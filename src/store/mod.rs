//! # Offer Store
//!
//! The single source of truth for offers and assignments, and the only
//! writable shared resource on the acceptance path. Exclusivity is enforced
//! here through atomic conditional updates, never through in-process locks,
//! because the protocol engine is horizontally replicated.
//!
//! Two implementations ship with the crate: [`PgOfferStore`] for durable
//! Postgres-backed deployments and [`InMemoryOfferStore`] with identical
//! conditional-update semantics for tests and single-process embedding.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryOfferStore;
pub use postgres::PgOfferStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{JobAssignment, JobOffer};

/// Result of a winning accept: the assignment plus every sibling revoked in
/// the same transactional boundary.
#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub assignment: JobAssignment,
    pub accepted: JobOffer,
    pub revoked_siblings: Vec<JobOffer>,
}

/// Result of a decline. `needs_redispatch` is set when the decline left the
/// job with zero non-terminal offers and no assignment.
#[derive(Debug, Clone)]
pub struct DeclineOutcome {
    pub offer: JobOffer,
    pub needs_redispatch: bool,
}

/// Result of an expiry sweep. `needs_redispatch` lists jobs the sweep
/// touched that ended with zero non-terminal offers and no assignment.
#[derive(Debug, Clone, Default)]
pub struct ExpirySweep {
    pub expired: Vec<JobOffer>,
    pub needs_redispatch: Vec<Uuid>,
}

/// Durable record of job offers and their lifecycle state.
///
/// Every mutating operation is a conditional update: the state predicate and
/// the mutation are a single atomic step, so concurrent callers across
/// replicas serialize on the record itself. Callers must treat observed
/// offer state as stale after any await and re-fetch before acting on it.
#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Atomically insert one `Pending` offer per candidate porter, sharing
    /// the job ID and expiry.
    ///
    /// Fails with `DispatchError::Conflict` if the job already has an
    /// assignment, an accepted offer, or a still-live pending offer.
    async fn insert_offers(
        &self,
        job_id: Uuid,
        porter_ids: &[Uuid],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobOffer>>;

    /// The exclusivity-critical path: `Pending -> Accepted` only if the
    /// porter matches, the state is still pending, the offer is unexpired,
    /// and the version is the one read. On success, sibling pending offers
    /// become `Revoked` and the assignment is created within the same
    /// transactional boundary.
    ///
    /// Loss outcomes are `DispatchError::AlreadyAccepted` and
    /// `DispatchError::Expired`; callers must not retry the same offer.
    async fn accept_offer(
        &self,
        offer_id: Uuid,
        porter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome>;

    /// `Pending -> Declined`; siblings are untouched.
    async fn decline_offer(
        &self,
        offer_id: Uuid,
        porter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DeclineOutcome>;

    /// Idempotent sweep: every `Pending` offer with `expires_at <= now`
    /// becomes `Expired`. Safe to run concurrently from multiple sweeper
    /// instances.
    async fn expire_due_offers(&self, now: DateTime<Utc>) -> Result<ExpirySweep>;

    /// Collaborator-driven cancellation: all `Pending` offers for the job
    /// become `Revoked`. Returns the revoked offers.
    async fn cancel_job_offers(&self, job_id: Uuid) -> Result<Vec<JobOffer>>;

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<JobOffer>>;

    /// All offers ever created for the job, oldest first.
    async fn offers_for_job(&self, job_id: Uuid) -> Result<Vec<JobOffer>>;

    async fn assignment_for_job(&self, job_id: Uuid) -> Result<Option<JobAssignment>>;

    /// Number of live (pending, unexpired) offers currently held by the
    /// porter; feeds the per-porter pending cap at dispatch time.
    async fn pending_offer_count(&self, porter_id: Uuid, now: DateTime<Utc>) -> Result<u64>;
}
