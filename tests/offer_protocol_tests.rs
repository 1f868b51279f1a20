//! Offer protocol integration tests: exclusivity under concurrent accepts,
//! TTL expiry, idempotent sweeps, and the absorbing nature of terminal
//! states, all exercised through the manager over the in-memory store.

mod common;

use chrono::Utc;
use dispatch_core::error::DispatchError;
use dispatch_core::models::OfferState;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::time::Duration;
use uuid::Uuid;

use common::harness;

/// Two porters race to accept sibling offers. Exactly one wins, the loser
/// gets a typed race loss, and the third sibling is revoked.
#[tokio::test]
async fn concurrent_accepts_yield_exactly_one_assignment() {
    let h = harness();
    let job_id = Uuid::new_v4();
    let porters: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let offers = h.manager.create_offers(job_id, &porters, None).await.unwrap();

    let mut tasks = Vec::new();
    for offer in &offers[1..] {
        let manager = h.manager.clone();
        let (offer_id, porter_id) = (offer.offer_id, offer.porter_id);
        tasks.push(tokio::spawn(async move {
            manager.accept_offer(offer_id, porter_id).await
        }));
    }

    let mut wins = 0u32;
    let mut losses = 0u32;
    for task in tasks {
        match task.await.unwrap() {
            Ok(assignment) => {
                assert_eq!(assignment.job_id, job_id);
                wins += 1;
            }
            Err(DispatchError::AlreadyAccepted { .. }) => losses += 1,
            Err(other) => panic!("unexpected loss outcome: {other}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(losses, 1);

    // one assignment, and the untouched sibling was revoked with the rest
    let assignment = h.manager.assignment_for_job(job_id).await.unwrap().unwrap();
    assert!(porters.contains(&assignment.porter_id));

    let final_offers = h.manager.offers_for_job(job_id).await.unwrap();
    let accepted = final_offers
        .iter()
        .filter(|o| o.state == OfferState::Accepted)
        .count();
    let revoked = final_offers
        .iter()
        .filter(|o| o.state == OfferState::Revoked)
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(revoked, 2);
}

/// A wider race: every sibling is accepted simultaneously many times over.
#[tokio::test]
async fn accept_storm_never_double_assigns() {
    let h = harness();
    let job_id = Uuid::new_v4();
    let porters: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let offers = h.manager.create_offers(job_id, &porters, None).await.unwrap();

    let mut tasks = Vec::new();
    for offer in &offers {
        for _ in 0..4 {
            let manager = h.manager.clone();
            let (offer_id, porter_id) = (offer.offer_id, offer.porter_id);
            tasks.push(tokio::spawn(async move {
                manager.accept_offer(offer_id, porter_id).await
            }));
        }
    }

    let mut wins = 0u32;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(DispatchError::AlreadyAccepted { .. }) => {}
            Err(other) => panic!("unexpected loss outcome: {other}"),
        }
    }
    assert_eq!(wins, 1);

    let final_offers = h.manager.offers_for_job(job_id).await.unwrap();
    assert_eq!(
        final_offers
            .iter()
            .filter(|o| o.state == OfferState::Accepted)
            .count(),
        1
    );
}

/// Accepting after the TTL has lapsed is a race loss against the clock even
/// before any sweep has run.
#[tokio::test]
async fn late_accept_loses_to_ttl() {
    let h = harness();
    let job_id = Uuid::new_v4();
    let porter = Uuid::new_v4();
    let offers = h
        .manager
        .create_offers(job_id, &[porter], Some(Duration::ZERO))
        .await
        .unwrap();

    let err = h
        .manager
        .accept_offer(offers[0].offer_id, porter)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Expired { .. }));

    // the sweep then records the expiry and flags the job for redispatch
    let sweep = h.manager.expire_offers(Utc::now()).await.unwrap();
    assert_eq!(sweep.expired.len(), 1);
    assert_eq!(sweep.needs_redispatch, vec![job_id]);
    assert!(h.manager.assignment_for_job(job_id).await.unwrap().is_none());
}

/// Running the sweep twice over the same instant transitions each offer
/// exactly once.
#[tokio::test]
async fn expiry_sweep_is_idempotent() {
    let h = harness();
    let job_id = Uuid::new_v4();
    h.manager
        .create_offers(
            job_id,
            &[Uuid::new_v4(), Uuid::new_v4()],
            Some(Duration::ZERO),
        )
        .await
        .unwrap();

    let now = Utc::now();
    let first = h.manager.expire_offers(now).await.unwrap();
    assert_eq!(first.expired.len(), 2);
    assert_eq!(first.needs_redispatch, vec![job_id]);

    let second = h.manager.expire_offers(now).await.unwrap();
    assert!(second.expired.is_empty());
    assert!(second.needs_redispatch.is_empty());
}

/// Declining is porter-scoped and leaves siblings live; only the last
/// decline flags the job for redispatch.
#[tokio::test]
async fn decline_leaves_siblings_live() {
    let h = harness();
    let job_id = Uuid::new_v4();
    let porters = [Uuid::new_v4(), Uuid::new_v4()];
    let offers = h.manager.create_offers(job_id, &porters, None).await.unwrap();

    let first = h
        .manager
        .decline_offer(offers[0].offer_id, porters[0])
        .await
        .unwrap();
    assert!(!first.needs_redispatch);

    let sibling = h.manager.get_offer(offers[1].offer_id).await.unwrap().unwrap();
    assert_eq!(sibling.state, OfferState::Pending);

    let last = h
        .manager
        .decline_offer(offers[1].offer_id, porters[1])
        .await
        .unwrap();
    assert!(last.needs_redispatch);
}

/// A porter cannot act on an offer addressed to someone else.
#[tokio::test]
async fn foreign_porter_is_rejected() {
    let h = harness();
    let job_id = Uuid::new_v4();
    let porter = Uuid::new_v4();
    let offers = h.manager.create_offers(job_id, &[porter], None).await.unwrap();

    let err = h
        .manager
        .accept_offer(offers[0].offer_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::PorterMismatch { .. }));

    // the offer is untouched and the rightful porter can still accept
    let offer = h.manager.get_offer(offers[0].offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Pending);
    assert_eq!(offer.version, offers[0].version);
    h.manager.accept_offer(offers[0].offer_id, porter).await.unwrap();
}

/// External cancellation revokes the whole round and unblocks nothing else.
#[tokio::test]
async fn cancellation_revokes_pending_round() {
    let h = harness();
    let job_id = Uuid::new_v4();
    let porters = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let offers = h.manager.create_offers(job_id, &porters, None).await.unwrap();
    h.manager
        .decline_offer(offers[0].offer_id, porters[0])
        .await
        .unwrap();

    // only the two still-pending offers are revoked
    assert_eq!(h.manager.cancel_offers(job_id).await.unwrap(), 2);

    let declined = h.manager.get_offer(offers[0].offer_id).await.unwrap().unwrap();
    assert_eq!(declined.state, OfferState::Declined);
}

/// After any terminal transition, no further operation can move the offer
/// or mint an assignment: terminal states are absorbing.
#[tokio::test]
async fn terminal_states_absorb_all_operations() {
    let h = harness();

    // accepted offer: sibling revoked, then every late operation bounces
    let job_id = Uuid::new_v4();
    let porters = [Uuid::new_v4(), Uuid::new_v4()];
    let offers = h.manager.create_offers(job_id, &porters, None).await.unwrap();
    h.manager
        .accept_offer(offers[0].offer_id, porters[0])
        .await
        .unwrap();

    for offer in &offers {
        let accept = h.manager.accept_offer(offer.offer_id, offer.porter_id).await;
        assert!(matches!(
            accept,
            Err(DispatchError::AlreadyAccepted { .. })
        ));
        let decline = h.manager.decline_offer(offer.offer_id, offer.porter_id).await;
        assert!(decline.is_err());
    }

    // the sweep never resurrects or re-expires terminal offers
    let sweep = h
        .manager
        .expire_offers(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert!(sweep.expired.is_empty());

    let final_offers = h.manager.offers_for_job(job_id).await.unwrap();
    assert_eq!(final_offers[0].state, OfferState::Accepted);
    assert_eq!(final_offers[1].state, OfferState::Revoked);
}

proptest! {
    /// Any interleaving of late accepts, declines, and sweeps after a win
    /// leaves the assignment and the terminal offer states untouched.
    #[test]
    fn no_resurrection_under_arbitrary_late_operations(
        ops in proptest::collection::vec(0u8..3, 1..20),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let h = harness();
            let job_id = Uuid::new_v4();
            let porters = [Uuid::new_v4(), Uuid::new_v4()];
            let offers = h.manager.create_offers(job_id, &porters, None).await.unwrap();
            let assignment = h
                .manager
                .accept_offer(offers[0].offer_id, porters[0])
                .await
                .unwrap();

            for op in ops {
                let target = &offers[(op % 2) as usize];
                match op {
                    0 => {
                        let _ = h.manager.accept_offer(target.offer_id, target.porter_id).await;
                    }
                    1 => {
                        let _ = h.manager.decline_offer(target.offer_id, target.porter_id).await;
                    }
                    _ => {
                        let _ = h
                            .manager
                            .expire_offers(Utc::now() + chrono::Duration::hours(1))
                            .await;
                    }
                }
            }

            let settled = h.manager.assignment_for_job(job_id).await.unwrap().unwrap();
            prop_assert_eq!(settled.porter_id, assignment.porter_id);
            prop_assert_eq!(settled.offer_id, assignment.offer_id);

            let final_offers = h.manager.offers_for_job(job_id).await.unwrap();
            prop_assert_eq!(final_offers[0].state, OfferState::Accepted);
            prop_assert_eq!(final_offers[1].state, OfferState::Revoked);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
