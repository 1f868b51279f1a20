//! Dispatch and redispatch integration tests: candidate selection over
//! presence and constraints, top-K truncation, burned-porter exclusion,
//! round bounds, and the sweeper-driven redispatch loop.

mod common;

use chrono::Utc;
use dispatch_core::config::{DispatchPolicyConfig, OffersConfig};
use dispatch_core::dispatch::{GeoPoint, JobConstraints, PorterProfile};
use dispatch_core::error::DispatchError;
use dispatch_core::models::OfferState;
use dispatch_core::presence::PresenceRegistry;
use dispatch_core::sweeper::ExpirySweeper;
use std::collections::HashSet;
use uuid::Uuid;

use common::{harness, harness_with};

fn pickup_at(lat: f64, lon: f64) -> JobConstraints {
    JobConstraints {
        pickup: Some(GeoPoint { lat, lon }),
        ..JobConstraints::default()
    }
}

/// With no porter connected, dispatch reports the condition instead of
/// creating an empty round.
#[tokio::test]
async fn no_connected_porters_is_no_candidates() {
    let h = harness();
    let job_id = Uuid::new_v4();
    let err = h
        .broadcaster
        .dispatch(job_id, &JobConstraints::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoCandidates { .. }));
    assert!(h.manager.offers_for_job(job_id).await.unwrap().is_empty());
}

/// Connected but ineligible porters (wrong vehicle, suspended) count for
/// nothing.
#[tokio::test]
async fn ineligible_porters_are_filtered_out() {
    let h = harness();

    let wrong_vehicle = h.connected_porter(4.9, None).await;
    let suspended = Uuid::new_v4();
    h.directory.upsert(PorterProfile {
        porter_id: suspended,
        vehicle_type: "truck".to_string(),
        capacity_kg: 1000.0,
        active: true,
        suspended: true,
        rating: 5.0,
        location: None,
    });
    h.presence.register(suspended, Uuid::new_v4()).await.unwrap();

    let constraints = JobConstraints {
        vehicle_type: Some("truck".to_string()),
        ..JobConstraints::default()
    };
    let err = h
        .broadcaster
        .dispatch(Uuid::new_v4(), &constraints)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoCandidates { .. }));
    let _ = wrong_vehicle;
}

/// Ranking is proximity first, and the round is truncated to K offers.
#[tokio::test]
async fn round_takes_top_k_by_proximity() {
    let h = harness_with(
        OffersConfig::default(),
        DispatchPolicyConfig {
            max_candidates_per_round: 2,
            ..DispatchPolicyConfig::default()
        },
    );

    let near = h.connected_porter(3.0, Some(GeoPoint { lat: 0.1, lon: 0.1 })).await;
    let mid = h.connected_porter(5.0, Some(GeoPoint { lat: 1.0, lon: 1.0 })).await;
    let far = h.connected_porter(5.0, Some(GeoPoint { lat: 9.0, lon: 9.0 })).await;

    let result = h
        .broadcaster
        .dispatch(Uuid::new_v4(), &pickup_at(0.0, 0.0))
        .await
        .unwrap();

    assert_eq!(result.round, 1);
    assert_eq!(result.snapshot.ranked_candidates, vec![near, mid, far]);
    let offered: Vec<Uuid> = result.offers.iter().map(|o| o.porter_id).collect();
    assert_eq!(offered, vec![near, mid]);
}

/// A porter sitting at the pending cap is skipped until an offer resolves.
#[tokio::test]
async fn pending_cap_skips_loaded_porter() {
    let h = harness_with(
        OffersConfig::default(),
        DispatchPolicyConfig {
            max_pending_offers_per_porter: 1,
            ..DispatchPolicyConfig::default()
        },
    );
    let porter = h.connected_porter(4.8, None).await;

    h.broadcaster
        .dispatch(Uuid::new_v4(), &JobConstraints::default())
        .await
        .unwrap();

    let err = h
        .broadcaster
        .dispatch(Uuid::new_v4(), &JobConstraints::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoCandidates { .. }));
    let _ = porter;
}

/// Porters who declined or timed out never see the same job again.
#[tokio::test]
async fn redispatch_excludes_burned_porters() {
    let h = harness();
    let job_id = Uuid::new_v4();

    let decliner = h.connected_porter(4.0, None).await;
    let sleeper = h.connected_porter(4.0, None).await;

    let first = h
        .broadcaster
        .dispatch(job_id, &JobConstraints::default())
        .await
        .unwrap();
    assert_eq!(first.offers.len(), 2);

    // one declines, the other lets the offer lapse
    let declined = first.offers.iter().find(|o| o.porter_id == decliner).unwrap();
    h.manager.decline_offer(declined.offer_id, decliner).await.unwrap();
    let sweep = h
        .manager
        .expire_offers(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(sweep.needs_redispatch, vec![job_id]);

    let fresh = h.connected_porter(4.0, None).await;
    let second = h
        .broadcaster
        .redispatch(job_id, &JobConstraints::default())
        .await
        .unwrap();

    assert_eq!(second.round, 2);
    let offered: HashSet<Uuid> = second.offers.iter().map(|o| o.porter_id).collect();
    assert_eq!(offered, HashSet::from([fresh]));
    assert!(!offered.contains(&decliner));
    assert!(!offered.contains(&sleeper));
}

/// The round counter bounds redispatch; exhaustion is surfaced as a typed
/// error for escalation, never an infinite loop.
#[tokio::test]
async fn redispatch_is_bounded() {
    let h = harness_with(
        OffersConfig {
            offer_ttl_seconds: 1,
            ..OffersConfig::default()
        },
        DispatchPolicyConfig {
            max_dispatch_rounds: 2,
            ..DispatchPolicyConfig::default()
        },
    );
    let job_id = Uuid::new_v4();
    let constraints = JobConstraints::default();

    for _ in 0..2 {
        h.connected_porter(4.0, None).await;
        let result = h.broadcaster.redispatch(job_id, &constraints).await.unwrap();
        // burn the round so the next one starts clean
        for offer in &result.offers {
            h.manager.decline_offer(offer.offer_id, offer.porter_id).await.unwrap();
        }
    }

    h.connected_porter(4.0, None).await;
    let err = h.broadcaster.redispatch(job_id, &constraints).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::DispatchExhausted { rounds: 2, .. }
    ));
}

/// A round that dies by decline (every offer refused before the TTL) opens
/// the next round instead of leaving the job stalled until expiry.
#[tokio::test]
async fn all_declined_round_triggers_redispatch() {
    let h = harness();
    let job_id = Uuid::new_v4();

    let first = h.connected_porter(4.0, None).await;
    let second = h.connected_porter(4.0, None).await;

    let round = h
        .broadcaster
        .dispatch(job_id, &JobConstraints::default())
        .await
        .unwrap();
    assert_eq!(round.offers.len(), 2);

    let mut last = None;
    for offer in &round.offers {
        last = Some(
            h.manager
                .decline_offer(offer.offer_id, offer.porter_id)
                .await
                .unwrap(),
        );
    }
    let last = last.unwrap();
    assert!(last.needs_redispatch, "final decline must flag redispatch");

    let fresh = h.connected_porter(4.0, None).await;
    assert!(h.broadcaster.handle_decline(&last).await.is_none());

    let offers = h.manager.offers_for_job(job_id).await.unwrap();
    let pending: Vec<Uuid> = offers
        .iter()
        .filter(|o| o.state == OfferState::Pending)
        .map(|o| o.porter_id)
        .collect();
    assert_eq!(pending, vec![fresh]);
    assert!(!pending.contains(&first));
    assert!(!pending.contains(&second));
}

/// A job that ends in assignment is dropped from the broadcaster's round
/// bookkeeping; only live jobs stay tracked.
#[tokio::test]
async fn settled_jobs_drop_round_bookkeeping() {
    let h = harness();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watch = h.broadcaster.clone().spawn_settlement_watch(shutdown_rx);

    let porter = h.connected_porter(4.5, None).await;
    let result = h
        .broadcaster
        .dispatch(Uuid::new_v4(), &JobConstraints::default())
        .await
        .unwrap();
    assert_eq!(h.broadcaster.tracked_jobs(), 1);

    h.manager
        .accept_offer(result.offers[0].offer_id, porter)
        .await
        .unwrap();

    let mut settled = false;
    for _ in 0..50 {
        if h.broadcaster.tracked_jobs() == 0 {
            settled = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(settled, "assigned job still tracked by the broadcaster");
    watch.abort();
}

/// Cancelling a job revokes its pending round and drops the bookkeeping in
/// one call.
#[tokio::test]
async fn cancellation_drops_round_bookkeeping() {
    let h = harness();
    h.connected_porter(4.5, None).await;

    let job_id = Uuid::new_v4();
    h.broadcaster
        .dispatch(job_id, &JobConstraints::default())
        .await
        .unwrap();
    assert_eq!(h.broadcaster.tracked_jobs(), 1);

    let revoked = h.broadcaster.cancel_job(job_id).await.unwrap();
    assert_eq!(revoked, 1);
    assert_eq!(h.broadcaster.tracked_jobs(), 0);
}

/// End to end through the sweeper: an expired round triggers an automatic
/// new round to a porter who has not been burned.
#[tokio::test]
async fn sweeper_drives_redispatch_after_expiry() {
    let h = harness_with(
        OffersConfig {
            offer_ttl_seconds: 1,
            expiry_sweep_interval_ms: 50,
            ..OffersConfig::default()
        },
        DispatchPolicyConfig {
            max_candidates_per_round: 1,
            ..DispatchPolicyConfig::default()
        },
    );
    let job_id = Uuid::new_v4();

    let first_porter = h.connected_porter(5.0, Some(GeoPoint { lat: 0.0, lon: 0.0 })).await;
    h.broadcaster.dispatch(job_id, &pickup_at(0.0, 0.0)).await.unwrap();

    // the first offer lapses while a farther porter comes online
    let backup = h.connected_porter(4.0, Some(GeoPoint { lat: 5.0, lon: 5.0 })).await;
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let sweeper = ExpirySweeper::new(
        h.manager.clone(),
        h.broadcaster.clone(),
        std::time::Duration::from_millis(50),
    );
    let sweep = sweeper.sweep_once().await.unwrap();
    assert_eq!(sweep.needs_redispatch, vec![job_id]);

    let offers = h.manager.offers_for_job(job_id).await.unwrap();
    let live: Vec<&_> = offers
        .iter()
        .filter(|o| o.state == OfferState::Pending)
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].porter_id, backup);
    assert_ne!(live[0].porter_id, first_porter);
}
