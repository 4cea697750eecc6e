//! beacon agent - keeps a client present in the registry
//!
//! This crate provides everything a client process needs:
//! - `identity` - Stable identity, created once and reused across restarts
//! - `registry_client` - HTTP calls to the registry daemon
//! - `agent` - Registration state machine and heartbeat loop
//! - `notify` - The `/notify` endpoint and notification sinks
//! - `net` - Local address detection
//! - `config` - TOML configuration
//!
//! **Panic-Free Policy:** Production code in this crate never calls
//! `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

pub mod agent;
pub mod config;
pub mod error;
pub mod identity;
pub mod net;
pub mod notify;
pub mod registry_client;

pub use agent::{AgentOptions, AgentState, RegistrationAgent};
pub use config::{AgentConfig, ConfigError};
pub use error::{AgentError, IdentityError};
pub use notify::{CommandSink, LogSink, NotificationSink};
pub use registry_client::{HttpRegistryClient, RegistryApi};
