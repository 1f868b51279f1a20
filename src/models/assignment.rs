//! # JobAssignment Model
//!
//! The durable, singular outcome of a job being accepted by exactly one
//! porter. Created inside the same transaction as the winning accept;
//! downstream order/billing systems read it, this core only writes it once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binds job to porter with the acceptance timestamp. Exactly one row per
/// job may ever exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAssignment {
    pub job_id: Uuid,
    pub porter_id: Uuid,
    /// The winning offer that produced this assignment.
    pub offer_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}
