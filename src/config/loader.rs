//! Configuration loading with environment awareness.
//!
//! Resolution order: explicit `DISPATCH_CONFIG_PATH`, then
//! `config/dispatch-{env}.yaml`, then `config/dispatch.yaml`. Absence of a
//! file is not an error; built-in defaults apply, but a file that exists and
//! fails to parse is always surfaced.

use std::path::{Path, PathBuf};

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration for the detected environment.
    pub fn load() -> Result<DispatchConfig> {
        let environment = Self::detect_environment();
        let config = match Self::resolve_path(&environment) {
            Some(path) => Self::load_from_file(&path)?,
            None => DispatchConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit YAML file.
    pub fn load_from_file(path: &Path) -> Result<DispatchConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::configuration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config: DispatchConfig = serde_yaml::from_str(&contents).map_err(|e| {
            DispatchError::configuration(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        Ok(config)
    }

    pub fn detect_environment() -> String {
        std::env::var("DISPATCH_ENV").unwrap_or_else(|_| "development".to_string())
    }

    fn resolve_path(environment: &str) -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("DISPATCH_CONFIG_PATH") {
            return Some(PathBuf::from(explicit));
        }
        let env_specific = PathBuf::from(format!("config/dispatch-{environment}.yaml"));
        if env_specific.exists() {
            return Some(env_specific);
        }
        let base = PathBuf::from("config/dispatch.yaml");
        if base.exists() {
            return Some(base);
        }
        None
    }
}
