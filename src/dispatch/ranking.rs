//! Pluggable candidate ranking.
//!
//! Ranking criteria are a business-policy concern external to the
//! protocol's correctness, so the broadcaster calls a strategy trait rather
//! than a fixed ordering. The default ranks by proximity to pickup, then
//! rating, with porter ID as a deterministic tie-break.

use crate::dispatch::eligibility::{JobConstraints, PorterProfile};

/// Strategy that orders eligible candidates, best first.
pub trait RankingPolicy: Send + Sync {
    fn rank(&self, constraints: &JobConstraints, candidates: Vec<PorterProfile>)
        -> Vec<PorterProfile>;
}

/// Default policy: nearest to pickup first, then highest rating.
///
/// Candidates without a known location sort after those with one.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProximityRatingPolicy;

impl RankingPolicy for ProximityRatingPolicy {
    fn rank(
        &self,
        constraints: &JobConstraints,
        mut candidates: Vec<PorterProfile>,
    ) -> Vec<PorterProfile> {
        candidates.sort_by(|a, b| {
            let da = distance_key(constraints, a);
            let db = distance_key(constraints, b);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.rating
                        .partial_cmp(&a.rating)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.porter_id.cmp(&b.porter_id))
        });
        candidates
    }
}

fn distance_key(constraints: &JobConstraints, porter: &PorterProfile) -> f64 {
    match (&constraints.pickup, &porter.location) {
        (Some(pickup), Some(location)) => pickup.distance_sq(location),
        _ => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::eligibility::GeoPoint;
    use uuid::Uuid;

    fn porter(rating: f64, location: Option<GeoPoint>) -> PorterProfile {
        PorterProfile {
            porter_id: Uuid::new_v4(),
            vehicle_type: "bike".to_string(),
            capacity_kg: 20.0,
            active: true,
            suspended: false,
            rating,
            location,
        }
    }

    #[test]
    fn nearest_wins_over_rating() {
        let constraints = JobConstraints {
            pickup: Some(GeoPoint { lat: 0.0, lon: 0.0 }),
            ..JobConstraints::default()
        };
        let near = porter(3.0, Some(GeoPoint { lat: 0.1, lon: 0.1 }));
        let far = porter(5.0, Some(GeoPoint { lat: 2.0, lon: 2.0 }));

        let ranked =
            ProximityRatingPolicy.rank(&constraints, vec![far.clone(), near.clone()]);
        assert_eq!(ranked[0].porter_id, near.porter_id);
        assert_eq!(ranked[1].porter_id, far.porter_id);
    }

    #[test]
    fn rating_breaks_ties_without_locations() {
        let constraints = JobConstraints::default();
        let good = porter(4.9, None);
        let poor = porter(2.1, None);

        let ranked = ProximityRatingPolicy.rank(&constraints, vec![poor.clone(), good.clone()]);
        assert_eq!(ranked[0].porter_id, good.porter_id);
    }

    #[test]
    fn unlocated_porters_rank_last() {
        let constraints = JobConstraints {
            pickup: Some(GeoPoint { lat: 0.0, lon: 0.0 }),
            ..JobConstraints::default()
        };
        let located = porter(1.0, Some(GeoPoint { lat: 5.0, lon: 5.0 }));
        let unknown = porter(5.0, None);

        let ranked =
            ProximityRatingPolicy.rank(&constraints, vec![unknown.clone(), located.clone()]);
        assert_eq!(ranked[0].porter_id, located.porter_id);
    }
}
