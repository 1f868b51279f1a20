//! # Dispatch Configuration System
//!
//! YAML-backed configuration with environment-specific overrides and
//! explicit validation. Policy thresholds that product has not pinned down
//! (redispatch round bound, per-porter pending cap) live here as tunable
//! values rather than hard-coded invariants.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dispatch_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let ttl = config.offers.offer_ttl_seconds;
//! # Ok(())
//! # }
//! ```

pub mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DispatchError, Result};

/// Root configuration for the dispatch core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub offers: OffersConfig,
    #[serde(default)]
    pub dispatch: DispatchPolicyConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            offers: OffersConfig::default(),
            dispatch: DispatchPolicyConfig::default(),
            presence: PresenceConfig::default(),
            gateway: GatewayConfig::default(),
            messaging: MessagingConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Validate cross-field constraints; no silent fallbacks.
    pub fn validate(&self) -> Result<()> {
        if self.offers.offer_ttl_seconds == 0 {
            return Err(DispatchError::configuration(
                "offers.offer_ttl_seconds must be positive",
            ));
        }
        if self.dispatch.max_candidates_per_round == 0 {
            return Err(DispatchError::configuration(
                "dispatch.max_candidates_per_round must be positive",
            ));
        }
        if self.dispatch.max_dispatch_rounds == 0 {
            return Err(DispatchError::configuration(
                "dispatch.max_dispatch_rounds must be positive",
            ));
        }
        if self.presence.heartbeat_timeout_seconds == 0 {
            return Err(DispatchError::configuration(
                "presence.heartbeat_timeout_seconds must be positive",
            ));
        }
        Ok(())
    }
}

/// Database connection settings for the offer store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Offer lifecycle tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OffersConfig {
    /// TTL applied to every offer in a dispatch round.
    #[serde(default = "default_offer_ttl")]
    pub offer_ttl_seconds: u64,
    /// Interval at which the expiry sweeper runs.
    #[serde(default = "default_sweep_interval")]
    pub expiry_sweep_interval_ms: u64,
}

impl OffersConfig {
    pub fn offer_ttl(&self) -> Duration {
        Duration::from_secs(self.offer_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }
}

impl Default for OffersConfig {
    fn default() -> Self {
        Self {
            offer_ttl_seconds: default_offer_ttl(),
            expiry_sweep_interval_ms: default_sweep_interval(),
        }
    }
}

/// Candidate selection and redispatch policy values.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchPolicyConfig {
    /// Upper bound on offers created per dispatch round (K).
    #[serde(default = "default_max_candidates")]
    pub max_candidates_per_round: usize,
    /// Bounded number of dispatch rounds before reporting exhaustion.
    #[serde(default = "default_max_rounds")]
    pub max_dispatch_rounds: u32,
    /// A porter carrying this many pending offers is skipped during
    /// candidate selection.
    #[serde(default = "default_pending_cap")]
    pub max_pending_offers_per_porter: u64,
}

impl Default for DispatchPolicyConfig {
    fn default() -> Self {
        Self {
            max_candidates_per_round: default_max_candidates(),
            max_dispatch_rounds: default_max_rounds(),
            max_pending_offers_per_porter: default_pending_cap(),
        }
    }
}

/// Presence heartbeat tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresenceConfig {
    /// A porter whose last heartbeat is older than this is no longer
    /// considered reachable.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
}

impl PresenceConfig {
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
        }
    }
}

/// Realtime gateway server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Bus transport settings for cross-replica event propagation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagingConfig {
    /// Prefix applied to every pgmq queue name.
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
    /// Bounded retry attempts when publishing a committed event to the bus.
    #[serde(default = "default_publish_attempts")]
    pub max_publish_attempts: u32,
    /// Base backoff between publish retries; doubles per attempt.
    #[serde(default = "default_publish_backoff")]
    pub publish_backoff_ms: u64,
    /// Visibility timeout handed to pgmq reads.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: i32,
}

impl MessagingConfig {
    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            queue_prefix: default_queue_prefix(),
            max_publish_attempts: default_publish_attempts(),
            publish_backoff_ms: default_publish_backoff(),
            visibility_timeout_seconds: default_visibility_timeout(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/dispatch_development".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_offer_ttl() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    1000
}

fn default_max_candidates() -> usize {
    3
}

fn default_max_rounds() -> u32 {
    3
}

fn default_pending_cap() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    45
}

fn default_bind_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_queue_prefix() -> String {
    "dispatch".to_string()
}

fn default_publish_attempts() -> u32 {
    5
}

fn default_publish_backoff() -> u64 {
    100
}

fn default_visibility_timeout() -> i32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DispatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.offers.offer_ttl_seconds, 30);
        assert_eq!(config.dispatch.max_dispatch_rounds, 3);
        assert_eq!(config.dispatch.max_pending_offers_per_porter, 5);
    }

    #[test]
    fn zero_ttl_rejected() {
        let mut config = DispatchConfig::default();
        config.offers.offer_ttl_seconds = 0;
        assert!(config.validate().is_err());
    }
}
