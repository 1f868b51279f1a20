//! Eligibility filtering for dispatch rounds.
//!
//! Porter profiles (vehicle, capacity, flags, location, rating) belong to
//! the surrounding platform; this core reads them through the
//! [`PorterDirectory`] seam as a read-only projection. The computed
//! [`EligibilitySnapshot`] is transient: recomputed on every dispatch,
//! never stored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Planar coordinates supplied by the collaborator; good enough for
/// city-scale proximity ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Squared planar distance; only used for ordering, units don't matter.
    pub fn distance_sq(&self, other: &GeoPoint) -> f64 {
        let dlat = self.lat - other.lat;
        let dlon = self.lon - other.lon;
        dlat * dlat + dlon * dlon
    }
}

/// Job requirements a candidate porter must satisfy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConstraints {
    /// Required vehicle type (exact match), if any.
    pub vehicle_type: Option<String>,
    /// Minimum carrying capacity in kilograms, if any.
    pub min_capacity_kg: Option<f64>,
    /// Pickup location for proximity ranking.
    pub pickup: Option<GeoPoint>,
}

/// Read-only porter projection owned by the surrounding platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PorterProfile {
    pub porter_id: Uuid,
    pub vehicle_type: String,
    pub capacity_kg: f64,
    pub active: bool,
    pub suspended: bool,
    pub rating: f64,
    pub location: Option<GeoPoint>,
}

impl PorterProfile {
    /// Constraint check: active, not suspended, vehicle and capacity match.
    pub fn satisfies(&self, constraints: &JobConstraints) -> bool {
        if !self.active || self.suspended {
            return false;
        }
        if let Some(required) = &constraints.vehicle_type {
            if &self.vehicle_type != required {
                return false;
            }
        }
        if let Some(min) = constraints.min_capacity_kg {
            if self.capacity_kg < min {
                return false;
            }
        }
        true
    }
}

/// Transient, per-dispatch ranked candidate list. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilitySnapshot {
    pub job_id: Uuid,
    pub computed_at: DateTime<Utc>,
    /// Candidate porter IDs in ranked order, before top-K truncation.
    pub ranked_candidates: Vec<Uuid>,
}

/// Seam to the platform's porter records.
#[async_trait]
pub trait PorterDirectory: Send + Sync {
    /// Profiles for the given porters; unknown IDs are simply absent from
    /// the result.
    async fn profiles(&self, porter_ids: &[Uuid]) -> Result<Vec<PorterProfile>>;
}

/// Map-backed directory for tests and embedded deployments.
#[derive(Default)]
pub struct InMemoryPorterDirectory {
    profiles: DashMap<Uuid, PorterProfile>,
}

impl InMemoryPorterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: PorterProfile) {
        self.profiles.insert(profile.porter_id, profile);
    }
}

#[async_trait]
impl PorterDirectory for InMemoryPorterDirectory {
    async fn profiles(&self, porter_ids: &[Uuid]) -> Result<Vec<PorterProfile>> {
        Ok(porter_ids
            .iter()
            .filter_map(|id| self.profiles.get(id).map(|p| p.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> PorterProfile {
        PorterProfile {
            porter_id: Uuid::new_v4(),
            vehicle_type: "van".to_string(),
            capacity_kg: 500.0,
            active: true,
            suspended: false,
            rating: 4.5,
            location: None,
        }
    }

    #[test]
    fn constraint_checks() {
        let porter = profile();
        assert!(porter.satisfies(&JobConstraints::default()));
        assert!(porter.satisfies(&JobConstraints {
            vehicle_type: Some("van".into()),
            min_capacity_kg: Some(400.0),
            pickup: None,
        }));
        assert!(!porter.satisfies(&JobConstraints {
            vehicle_type: Some("truck".into()),
            ..JobConstraints::default()
        }));
        assert!(!porter.satisfies(&JobConstraints {
            min_capacity_kg: Some(750.0),
            ..JobConstraints::default()
        }));
    }

    #[test]
    fn inactive_and_suspended_never_eligible() {
        let mut inactive = profile();
        inactive.active = false;
        assert!(!inactive.satisfies(&JobConstraints::default()));

        let mut suspended = profile();
        suspended.suspended = true;
        assert!(!suspended.satisfies(&JobConstraints::default()));
    }
}
