//! beacon.toml configuration for the client agent.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentOptions;
use crate::identity::default_identity_path;

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

/// Client agent settings. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the registry daemon
    pub registry_url: String,

    /// Port the notify endpoint listens on
    pub listen_port: u16,

    /// Host advertised to the registry; detected when unset
    pub advertise_host: Option<String>,

    /// Label for a newly created identity; host name when unset
    pub label: Option<String>,

    /// Where the stable identity is kept
    pub identity_path: PathBuf,

    pub heartbeat_interval_secs: u64,

    /// Retries after the first failed registration
    pub max_retries: u32,

    pub retry_delay_secs: u64,

    /// Timeout for each call to the registry
    pub request_timeout_secs: u64,

    /// Program and arguments run for each notification (message appended)
    pub notify_command: Option<Vec<String>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let options = AgentOptions::default();
        Self {
            registry_url: "http://127.0.0.1:4000".to_string(),
            listen_port: 3000,
            advertise_host: None,
            label: None,
            identity_path: default_identity_path(),
            heartbeat_interval_secs: options.heartbeat_interval.as_secs(),
            max_retries: options.max_retries,
            retry_delay_secs: options.retry_delay.as_secs(),
            request_timeout_secs: 10,
            notify_command: None,
        }
    }
}

impl AgentConfig {
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

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.registry_url.trim().is_empty() {
            return Err(ConfigError::Invalid("registry_url is empty".to_string()));
        }
        if matches!(&self.notify_command, Some(argv) if argv.is_empty()) {
            return Err(ConfigError::Invalid("notify_command is empty".to_string()));
        }
        Ok(())
    }

    /// Timing and retry settings for the registration agent.
    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
