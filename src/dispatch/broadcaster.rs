//! # Dispatch Broadcaster
//!
//! Computes the eligible porter set for a job (presence + constraints +
//! ranking policy), opens an offer round through the manager, and drives
//! bounded redispatch when a round dies without an acceptance.
//!
//! Round bookkeeping (attempt counter, original constraints) is kept
//! process-local: exclusion of porters who already declined or timed out is
//! derived from the store, so replicas stay consistent where correctness
//! requires it.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::DispatchPolicyConfig;
use crate::error::{DispatchError, Result};
use crate::dispatch::eligibility::{EligibilitySnapshot, JobConstraints, PorterDirectory};
use crate::dispatch::ranking::RankingPolicy;
use crate::events::OfferTopic;
use crate::models::{JobOffer, OfferState};
use crate::offers::OfferManager;
use crate::presence::PresenceRegistry;
use crate::store::{DeclineOutcome, ExpirySweep};

/// Outcome of one dispatch round.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub job_id: Uuid,
    /// 1-based round number for this job within this broadcaster.
    pub round: u32,
    pub snapshot: EligibilitySnapshot,
    pub offers: Vec<JobOffer>,
}

/// Selects candidates and opens offer rounds.
pub struct DispatchBroadcaster {
    manager: OfferManager,
    presence: Arc<dyn PresenceRegistry>,
    directory: Arc<dyn PorterDirectory>,
    ranking: Arc<dyn RankingPolicy>,
    config: DispatchPolicyConfig,
    /// Rounds opened per job by this broadcaster instance.
    rounds: DashMap<Uuid, u32>,
    /// Constraints recorded at first dispatch so sweeper-driven redispatch
    /// can reuse them.
    constraints: DashMap<Uuid, JobConstraints>,
}

impl DispatchBroadcaster {
    pub fn new(
        manager: OfferManager,
        presence: Arc<dyn PresenceRegistry>,
        directory: Arc<dyn PorterDirectory>,
        ranking: Arc<dyn RankingPolicy>,
        config: DispatchPolicyConfig,
    ) -> Self {
        Self {
            manager,
            presence,
            directory,
            ranking,
            config,
            rounds: DashMap::new(),
            constraints: DashMap::new(),
        }
    }

    /// Open a dispatch round for the job.
    ///
    /// Candidate set = connected porters, minus those who already declined
    /// or let an offer for this job expire, filtered by constraints and the
    /// per-porter pending cap, ranked by policy, truncated to K.
    #[instrument(skip(self, constraints))]
    pub async fn dispatch(
        &self,
        job_id: Uuid,
        constraints: &JobConstraints,
    ) -> Result<DispatchResult> {
        let now = Utc::now();

        let connected = self.presence.connected_porters(now).await?;
        if connected.is_empty() {
            return Err(DispatchError::NoCandidates { job_id });
        }

        // Porters burned in prior rounds are excluded from redispatch.
        let prior = self.manager.offers_for_job(job_id).await?;
        let burned: HashSet<Uuid> = prior
            .iter()
            .filter(|o| matches!(o.state, OfferState::Declined | OfferState::Expired))
            .map(|o| o.porter_id)
            .collect();

        let candidate_ids: Vec<Uuid> = connected
            .into_iter()
            .filter(|id| !burned.contains(id))
            .collect();

        let profiles = self.directory.profiles(&candidate_ids).await?;
        let mut eligible = Vec::with_capacity(profiles.len());
        for profile in profiles {
            if !profile.satisfies(constraints) {
                continue;
            }
            let pending = self
                .manager
                .store()
                .pending_offer_count(profile.porter_id, now)
                .await?;
            if pending >= self.config.max_pending_offers_per_porter {
                debug!(porter_id = %profile.porter_id, pending, "porter at pending cap, skipped");
                continue;
            }
            eligible.push(profile);
        }

        let ranked = self.ranking.rank(constraints, eligible);
        let snapshot = EligibilitySnapshot {
            job_id,
            computed_at: now,
            ranked_candidates: ranked.iter().map(|p| p.porter_id).collect(),
        };

        let selected: Vec<Uuid> = snapshot
            .ranked_candidates
            .iter()
            .take(self.config.max_candidates_per_round)
            .copied()
            .collect();
        if selected.is_empty() {
            return Err(DispatchError::NoCandidates { job_id });
        }

        let offers = self.manager.create_offers(job_id, &selected, None).await?;

        let round = {
            let mut entry = self.rounds.entry(job_id).or_insert(0);
            *entry += 1;
            *entry
        };
        self.constraints.insert(job_id, constraints.clone());

        info!(job_id = %job_id, round, offers = offers.len(), "dispatch round opened");
        Ok(DispatchResult {
            job_id,
            round,
            snapshot,
            offers,
        })
    }

    /// Re-run candidate selection after a round died without acceptance,
    /// bounded by `max_dispatch_rounds`.
    #[instrument(skip(self, constraints))]
    pub async fn redispatch(
        &self,
        job_id: Uuid,
        constraints: &JobConstraints,
    ) -> Result<DispatchResult> {
        let attempted = self.rounds.get(&job_id).map(|r| *r).unwrap_or(0);
        if attempted >= self.config.max_dispatch_rounds {
            return Err(DispatchError::DispatchExhausted {
                job_id,
                rounds: attempted,
            });
        }
        self.dispatch(job_id, constraints).await
    }

    /// Wire an expiry sweep's "needs redispatch" signal into new rounds.
    /// Failures are reported back for escalation; jobs this broadcaster has
    /// no recorded constraints for are skipped (another replica owns them).
    pub async fn handle_sweep(&self, sweep: &ExpirySweep) -> Vec<(Uuid, DispatchError)> {
        let mut failures = Vec::new();
        for job_id in &sweep.needs_redispatch {
            let Some(constraints) = self.constraints.get(job_id).map(|c| c.clone()) else {
                debug!(job_id = %job_id, "no recorded constraints, skipping redispatch");
                continue;
            };
            match self.redispatch(*job_id, &constraints).await {
                Ok(result) => {
                    debug!(job_id = %job_id, round = result.round, "redispatched after expiry");
                }
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "redispatch failed");
                    failures.push((*job_id, err));
                }
            }
        }
        failures
    }

    /// Redispatch after the last live offer for a job was declined.
    ///
    /// The store reports `needs_redispatch` when a decline leaves no
    /// pending siblings; this is the counterpart of [`handle_sweep`] for
    /// rounds that die by decline instead of expiry. Returns the dispatch
    /// error on failure so the caller can escalate, `None` otherwise.
    ///
    /// [`handle_sweep`]: DispatchBroadcaster::handle_sweep
    pub async fn handle_decline(&self, outcome: &DeclineOutcome) -> Option<DispatchError> {
        if !outcome.needs_redispatch {
            return None;
        }
        let job_id = outcome.offer.job_id;
        let Some(constraints) = self.constraints.get(&job_id).map(|c| c.clone()) else {
            debug!(job_id = %job_id, "no recorded constraints, skipping redispatch");
            return None;
        };
        match self.redispatch(job_id, &constraints).await {
            Ok(result) => {
                debug!(job_id = %job_id, round = result.round, "redispatched after final decline");
                None
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "redispatch failed");
                Some(err)
            }
        }
    }

    /// Revoke the pending round for a collaborator-cancelled job and drop
    /// its round bookkeeping. Returns the number of offers revoked.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<u64> {
        let revoked = self.manager.cancel_offers(job_id).await?;
        self.forget_job(job_id);
        Ok(revoked)
    }

    /// Watch the event plane and drop round bookkeeping once a job is
    /// assigned. Acceptances from other replicas arrive through the inbound
    /// relay, so remote settlements are forgotten here too.
    pub fn spawn_settlement_watch(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let broadcaster = self;
        let mut rx = broadcaster.manager.publisher().subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = rx.recv() => match received {
                        Ok(event) if event.topic == OfferTopic::Accepted => {
                            debug!(job_id = %event.job_id, "job assigned, dropping round bookkeeping");
                            broadcaster.forget_job(event.job_id);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Number of jobs with live round bookkeeping.
    pub fn tracked_jobs(&self) -> usize {
        self.rounds.len()
    }

    /// Drop round bookkeeping for a finished job (assigned, cancelled, or
    /// escalated).
    pub fn forget_job(&self, job_id: Uuid) {
        self.rounds.remove(&job_id);
        self.constraints.remove(&job_id);
    }
}
