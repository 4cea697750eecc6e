//! Error types for the client agent.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::path::PathBuf;

use beacon_core::ClientId;
use thiserror::Error;

// ============================================================================
// Agent Error Type
// ============================================================================

/// Errors raised while talking to the registry.
///
/// # Recovery
///
/// - `UnknownIdentity` means the registry evicted or forgot this client;
///   registering again fixes it
/// - `Transport` is retried (bounded during registration, next period for
///   heartbeats)
/// - `Rejected` with a 4xx status is a caller error and will not go away on
///   retry; a 5xx rejection is retried like `Transport`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The registry has no record of this identity.
    #[error("registry does not know identity {0}")]
    UnknownIdentity(ClientId),

    /// The registry answered with a non-2xx status.
    #[error("registry rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The registry could not be reached.
    #[error("registry unreachable: {0}")]
    Transport(String),

    /// The registry answered 2xx with a body we could not read.
    #[error("unexpected registry response: {0}")]
    Decode(String),

    /// Every registration attempt failed.
    #[error("registration failed after {attempts} attempt(s)")]
    RegistrationExhausted { attempts: u32 },

    /// The agent was shut down while waiting.
    #[error("agent is shutting down")]
    Cancelled,
}

impl AgentError {
    /// Returns true if the same request may succeed when sent again.
    ///
    /// A 4xx rejection means the request itself is wrong, so only transport
    /// problems, unreadable answers and 5xx rejections qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Decode(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::UnknownIdentity(_) | Self::RegistrationExhausted { .. } | Self::Cancelled => {
                false
            }
        }
    }
}

/// Errors raised while loading or creating the stable identity.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("failed to access identity file {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The file exists but holds nothing usable.
    #[error("identity file {path} is empty")]
    Empty { path: PathBuf },
}

/// Result type for registry calls.
pub type Result<T> = std::result::Result<T, AgentError>;
