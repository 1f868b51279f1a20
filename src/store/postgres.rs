//! Postgres offer store.
//!
//! The accept path is a single conditional UPDATE keyed on offer ID +
//! expected version + pending state + unexpired TTL + porter match, with
//! sibling revocation and the assignment insert in the same transaction.
//! A unique constraint on `porter_assignments.job_id` backstops the
//! at-most-one-assignment invariant even across replicas.
//!
//! Schema lives in `migrations/0001_offer_protocol.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{AcceptOutcome, DeclineOutcome, ExpirySweep, OfferStore};
use crate::error::{DispatchError, Result};
use crate::models::{JobAssignment, JobOffer, OfferState};

const OFFER_COLUMNS: &str =
    "offer_id, job_id, porter_id, state, created_at, expires_at, version";

#[derive(Debug, FromRow)]
struct OfferRow {
    offer_id: Uuid,
    job_id: Uuid,
    porter_id: Uuid,
    state: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    version: i32,
}

impl OfferRow {
    fn into_offer(self) -> Result<JobOffer> {
        let state: OfferState = self
            .state
            .parse()
            .map_err(|e: String| DispatchError::store("load_offer", e))?;
        Ok(JobOffer {
            offer_id: self.offer_id,
            job_id: self.job_id,
            porter_id: self.porter_id,
            state,
            created_at: self.created_at,
            expires_at: self.expires_at,
            version: self.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    job_id: Uuid,
    porter_id: Uuid,
    offer_id: Uuid,
    accepted_at: DateTime<Utc>,
}

impl From<AssignmentRow> for JobAssignment {
    fn from(row: AssignmentRow) -> Self {
        Self {
            job_id: row.job_id,
            porter_id: row.porter_id,
            offer_id: row.offer_id,
            accepted_at: row.accepted_at,
        }
    }
}

/// Durable offer store backed by Postgres.
#[derive(Clone)]
pub struct PgOfferStore {
    pool: PgPool,
}

impl PgOfferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_offer_for_update(
        tx: &mut Transaction<'_, Postgres>,
        offer_id: Uuid,
    ) -> Result<Option<JobOffer>> {
        let row = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM porter_offers WHERE offer_id = $1 FOR UPDATE"
        ))
        .bind(offer_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(OfferRow::into_offer).transpose()
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

    async fn job_needs_redispatch(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
    ) -> Result<bool> {
        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM porter_offers WHERE job_id = $1 AND state = 'pending'",
        )
        .bind(job_id)
        .fetch_one(&mut **tx)
        .await?;
        if pending > 0 {
            return Ok(false);
        }
        let assigned: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM porter_assignments WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&mut **tx)
                .await?;
        Ok(assigned == 0)
    }
}

#[async_trait]
impl OfferStore for PgOfferStore {
    #[instrument(skip(self, porter_ids), fields(candidates = porter_ids.len()))]
    async fn insert_offers(
        &self,
        job_id: Uuid,
        porter_ids: &[Uuid],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobOffer>> {
        let mut tx = self.pool.begin().await?;

        // Serialize round creation per job against concurrent dispatchers.
        let existing = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM porter_offers WHERE job_id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await?;
        for row in existing {
            let offer = row.into_offer()?;
            if offer.state == OfferState::Accepted || offer.is_live(now) {
                return Err(DispatchError::Conflict {
                    job_id,
                    message: format!(
                        "live dispatch round: offer {} is {}",
                        offer.offer_id, offer.state
                    ),
                });
            }
        }
        let assigned: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM porter_assignments WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await?;
        if assigned > 0 {
            return Err(DispatchError::Conflict {
                job_id,
                message: "job already assigned".to_string(),
            });
        }

        let mut created = Vec::with_capacity(porter_ids.len());
        for porter_id in porter_ids {
            let row = sqlx::query_as::<_, OfferRow>(&format!(
                "INSERT INTO porter_offers \
                 (offer_id, job_id, porter_id, state, created_at, expires_at, version) \
                 VALUES ($1, $2, $3, 'pending', $4, $5, 1) \
                 RETURNING {OFFER_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(job_id)
            .bind(porter_id)
            .bind(now)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .await?;
            created.push(row.into_offer()?);
        }

        tx.commit().await?;
        debug!(job_id = %job_id, offers = created.len(), "dispatch round persisted");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn accept_offer(
        &self,
        offer_id: Uuid,
        porter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome> {
        let mut tx = self.pool.begin().await?;

        let offer = Self::fetch_offer_for_update(&mut tx, offer_id)
            .await?
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

        // Conditional update: state predicate, TTL, and the version read
        // above must all still hold for the row to change.
        let accepted = sqlx::query_as::<_, OfferRow>(&format!(
            "UPDATE porter_offers \
             SET state = 'accepted', version = version + 1 \
             WHERE offer_id = $1 AND porter_id = $2 AND state = 'pending' \
               AND version = $3 AND expires_at > $4 \
             RETURNING {OFFER_COLUMNS}"
        ))
        .bind(offer_id)
        .bind(porter_id)
        .bind(offer.version)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let accepted = match accepted {
            Some(row) => row.into_offer()?,
            // The row lock above makes this unreachable in practice, but a
            // replica racing through a different code path loses here.
            None => {
                warn!(offer_id = %offer_id, "conditional accept matched zero rows");
                return Err(DispatchError::AlreadyAccepted { offer_id });
            }
        };

        let revoked_rows = sqlx::query_as::<_, OfferRow>(&format!(
            "UPDATE porter_offers \
             SET state = 'revoked', version = version + 1 \
             WHERE job_id = $1 AND offer_id <> $2 AND state = 'pending' \
             RETURNING {OFFER_COLUMNS}"
        ))
        .bind(offer.job_id)
        .bind(offer_id)
        .fetch_all(&mut *tx)
        .await?;
        let revoked_siblings = revoked_rows
            .into_iter()
            .map(OfferRow::into_offer)
            .collect::<Result<Vec<_>>>()?;

        let assignment_row = sqlx::query_as::<_, AssignmentRow>(
            "INSERT INTO porter_assignments (job_id, porter_id, offer_id, accepted_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING job_id, porter_id, offer_id, accepted_at",
        )
        .bind(offer.job_id)
        .bind(porter_id)
        .bind(offer_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            // Unique job_id constraint: a sibling won on another replica.
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DispatchError::AlreadyAccepted { offer_id }
            }
            _ => DispatchError::from(e),
        })?;

        tx.commit().await?;
        debug!(
            job_id = %offer.job_id,
            porter_id = %porter_id,
            revoked = revoked_siblings.len(),
            "offer accepted"
        );
        Ok(AcceptOutcome {
            assignment: assignment_row.into(),
            accepted,
            revoked_siblings,
        })
    }

    #[instrument(skip(self))]
    async fn decline_offer(
        &self,
        offer_id: Uuid,
        porter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DeclineOutcome> {
        let mut tx = self.pool.begin().await?;

        let offer = Self::fetch_offer_for_update(&mut tx, offer_id)
            .await?
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

        let declined = sqlx::query_as::<_, OfferRow>(&format!(
            "UPDATE porter_offers \
             SET state = 'declined', version = version + 1 \
             WHERE offer_id = $1 AND state = 'pending' AND version = $2 \
             RETURNING {OFFER_COLUMNS}"
        ))
        .bind(offer_id)
        .bind(offer.version)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DispatchError::AlreadyAccepted { offer_id })?
        .into_offer()?;

        let needs_redispatch = Self::job_needs_redispatch(&mut tx, offer.job_id).await?;
        tx.commit().await?;

        Ok(DeclineOutcome {
            offer: declined,
            needs_redispatch,
        })
    }

    #[instrument(skip(self))]
    async fn expire_due_offers(&self, now: DateTime<Utc>) -> Result<ExpirySweep> {
        let mut tx = self.pool.begin().await?;

        // Conditional transition: concurrent sweepers each expire a disjoint
        // subset, never double-expire.
        let expired_rows = sqlx::query_as::<_, OfferRow>(&format!(
            "UPDATE porter_offers \
             SET state = 'expired', version = version + 1 \
             WHERE state = 'pending' AND expires_at <= $1 \
             RETURNING {OFFER_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        let expired = expired_rows
            .into_iter()
            .map(OfferRow::into_offer)
            .collect::<Result<Vec<_>>>()?;

        let mut touched_jobs: Vec<Uuid> = expired.iter().map(|o| o.job_id).collect();
        touched_jobs.sort();
        touched_jobs.dedup();

        let mut needs_redispatch = Vec::new();
        for job_id in touched_jobs {
            if Self::job_needs_redispatch(&mut tx, job_id).await? {
                needs_redispatch.push(job_id);
            }
        }

        tx.commit().await?;
        if !expired.is_empty() {
            debug!(
                expired = expired.len(),
                redispatch_jobs = needs_redispatch.len(),
                "expiry sweep complete"
            );
        }
        Ok(ExpirySweep {
            expired,
            needs_redispatch,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_job_offers(&self, job_id: Uuid) -> Result<Vec<JobOffer>> {
        let rows = sqlx::query_as::<_, OfferRow>(&format!(
            "UPDATE porter_offers \
             SET state = 'revoked', version = version + 1 \
             WHERE job_id = $1 AND state = 'pending' \
             RETURNING {OFFER_COLUMNS}"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OfferRow::into_offer).collect()
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<JobOffer>> {
        let row = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM porter_offers WHERE offer_id = $1"
        ))
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(OfferRow::into_offer).transpose()
    }

    async fn offers_for_job(&self, job_id: Uuid) -> Result<Vec<JobOffer>> {
        let rows = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM porter_offers \
             WHERE job_id = $1 ORDER BY created_at, offer_id"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OfferRow::into_offer).collect()
    }

    async fn assignment_for_job(&self, job_id: Uuid) -> Result<Option<JobAssignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            "SELECT job_id, porter_id, offer_id, accepted_at \
             FROM porter_assignments WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(JobAssignment::from))
    }

    async fn pending_offer_count(&self, porter_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM porter_offers \
             WHERE porter_id = $1 AND state = 'pending' AND expires_at > $2",
        )
        .bind(porter_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}
