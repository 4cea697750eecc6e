//! beacond.toml configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working registry.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DEFAULT_DELIVERY_TIMEOUT;
use crate::registry::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("failed to parse {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Registry daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Address the HTTP server binds
    pub listen: SocketAddr,

    /// Where the membership snapshot is kept
    pub snapshot_path: PathBuf,

    /// Silence after which a client is evicted
    pub ttl_secs: u64,

    /// Period of the expiry sweep
    pub sweep_interval_secs: u64,

    /// Upper bound for one outbound notify call
    pub delivery_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 4000)),
            snapshot_path: default_snapshot_path(),
            ttl_secs: DEFAULT_TTL.as_secs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT.as_secs(),
        }
    }
}

impl RegistryConfig {
    /// Reads and validates a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::Invalid("ttl_secs must be positive".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.delivery_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "delivery_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

fn default_snapshot_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("beacon")
        .join("clients.json")
}
