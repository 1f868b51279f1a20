//! # Offer Manager
//!
//! The protocol engine. Creates offer rounds, processes acceptance attempts
//! through the store's conditional-update primitive, revokes siblings,
//! records assignments, and publishes lifecycle events after the store has
//! committed. All exclusivity enforcement lives in the store; this layer
//! never holds an in-process lock across offers, because replicas of it run
//! simultaneously.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::OffersConfig;
use crate::error::Result;
use crate::events::{EventPublisher, OfferEventMessage, OfferTopic};
use crate::models::{JobAssignment, JobOffer};
use crate::store::{DeclineOutcome, ExpirySweep, OfferStore};

/// Protocol engine for the offer lifecycle.
#[derive(Clone)]
pub struct OfferManager {
    store: Arc<dyn OfferStore>,
    publisher: EventPublisher,
    config: OffersConfig,
}

impl OfferManager {
    pub fn new(store: Arc<dyn OfferStore>, publisher: EventPublisher, config: OffersConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn store(&self) -> &Arc<dyn OfferStore> {
        &self.store
    }

    /// Open a dispatch round: one `Pending` offer per candidate, sharing the
    /// job ID and TTL. Fails with `Conflict` while a live round or an
    /// assignment exists for the job.
    #[instrument(skip(self, candidate_porter_ids), fields(candidates = candidate_porter_ids.len()))]
    pub async fn create_offers(
        &self,
        job_id: Uuid,
        candidate_porter_ids: &[Uuid],
        ttl: Option<Duration>,
    ) -> Result<Vec<JobOffer>> {
        let now = Utc::now();
        let ttl = ttl.unwrap_or_else(|| self.config.offer_ttl());
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(self.config.offer_ttl_seconds as i64));

        let offers = self
            .store
            .insert_offers(job_id, candidate_porter_ids, expires_at, now)
            .await?;

        for offer in &offers {
            self.publisher
                .publish(OfferEventMessage::for_offer(OfferTopic::Created, offer));
        }
        info!(job_id = %job_id, offers = offers.len(), "dispatch round created");
        Ok(offers)
    }

    /// The exclusivity-critical path. Exactly one concurrent call across a
    /// job's sibling offers can succeed; losers receive `AlreadyAccepted`
    /// or `Expired` and must not retry the same offer.
    #[instrument(skip(self))]
    pub async fn accept_offer(&self, offer_id: Uuid, porter_id: Uuid) -> Result<JobAssignment> {
        let now = Utc::now();
        let outcome = self.store.accept_offer(offer_id, porter_id, now).await?;

        self.publisher.publish(OfferEventMessage::for_offer(
            OfferTopic::Accepted,
            &outcome.accepted,
        ));
        for sibling in &outcome.revoked_siblings {
            self.publisher
                .publish(OfferEventMessage::for_offer(OfferTopic::Revoked, sibling));
        }
        info!(
            job_id = %outcome.assignment.job_id,
            porter_id = %porter_id,
            revoked = outcome.revoked_siblings.len(),
            "job assigned"
        );
        Ok(outcome.assignment)
    }

    /// `Pending -> Declined`. Siblings are untouched; the outcome reports
    /// whether the job is now out of live offers and needs redispatch.
    #[instrument(skip(self))]
    pub async fn decline_offer(&self, offer_id: Uuid, porter_id: Uuid) -> Result<DeclineOutcome> {
        let now = Utc::now();
        let outcome = self.store.decline_offer(offer_id, porter_id, now).await?;
        debug!(
            offer_id = %offer_id,
            needs_redispatch = outcome.needs_redispatch,
            "offer declined"
        );
        Ok(outcome)
    }

    /// Idempotent expiry sweep; publishes one `offers.expired` event per
    /// transition and returns jobs left without live offers or assignment.
    #[instrument(skip(self))]
    pub async fn expire_offers(&self, now: DateTime<Utc>) -> Result<ExpirySweep> {
        let sweep = self.store.expire_due_offers(now).await?;
        for offer in &sweep.expired {
            self.publisher
                .publish(OfferEventMessage::for_offer(OfferTopic::Expired, offer));
        }
        Ok(sweep)
    }

    /// Collaborator-driven cancellation: the order system owns job
    /// existence; on external cancellation every pending offer is revoked.
    #[instrument(skip(self))]
    pub async fn cancel_offers(&self, job_id: Uuid) -> Result<u64> {
        let revoked = self.store.cancel_job_offers(job_id).await?;
        for offer in &revoked {
            self.publisher
                .publish(OfferEventMessage::for_offer(OfferTopic::Revoked, offer));
        }
        info!(job_id = %job_id, revoked = revoked.len(), "job offers cancelled");
        Ok(revoked.len() as u64)
    }

    pub async fn get_offer(&self, offer_id: Uuid) -> Result<Option<JobOffer>> {
        self.store.get_offer(offer_id).await
    }

    pub async fn offers_for_job(&self, job_id: Uuid) -> Result<Vec<JobOffer>> {
        self.store.offers_for_job(job_id).await
    }

    /// Read-only projection for the order system.
    pub async fn assignment_for_job(&self, job_id: Uuid) -> Result<Option<JobAssignment>> {
        self.store.assignment_for_job(job_id).await
    }
}
