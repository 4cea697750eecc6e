//! Client identity and liveness records.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Stable identity of one client process.
///
/// Created once by the client, persisted locally and reused across restarts.
/// The usual shape is `<label>@<random-suffix>` (e.g. `"desk-42@3f2c9a..."`),
/// but the registry treats the value as an opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

/// Separator between the human label and the random suffix.
pub const LABEL_SEPARATOR: char = '@';

impl ClientId {
    /// Creates a ClientId without validation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses a ClientId from untrusted input.
    ///
    /// Surrounding whitespace is trimmed; a blank value is rejected.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::MissingField { field: "identity" });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Builds an identity from a label and a random suffix.
    pub fn from_parts(label: &str, suffix: &str) -> Self {
        Self(format!("{label}{LABEL_SEPARATOR}{suffix}"))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the human label (everything before the first `@`).
    ///
    /// Identities without a separator are returned whole.
    #[must_use]
    pub fn label(&self) -> &str {
        self.0
            .split_once(LABEL_SEPARATOR)
            .map(|(label, _)| label)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Liveness Record
// ============================================================================

/// Reachable address and last-seen time for one registered client.
///
/// `last_heartbeat` is stored as epoch milliseconds. The camelCase
/// `lastHeartbeat` key is accepted when loading older snapshot files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessRecord {
    /// Host the client's notify endpoint listens on
    pub host: String,

    /// Port of the client's notify endpoint
    pub port: u16,

    /// When the client last registered or sent a heartbeat
    #[serde(with = "chrono::serde::ts_milliseconds", alias = "lastHeartbeat")]
    pub last_heartbeat: DateTime<Utc>,
}

impl LivenessRecord {
    /// Creates a record seen at `at`.
    pub fn new(host: impl Into<String>, port: u16, at: DateTime<Utc>) -> Self {
        Self {
            host: host.into(),
            port,
            last_heartbeat: at,
        }
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// How long the client has been silent as of `now`.
    ///
    /// Negative when `last_heartbeat` lies in the future (clock skew).
    pub fn silent_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_heartbeat)
    }

    /// Returns true if the silence strictly exceeds `ttl`.
    ///
    /// A TTL too large to represent never expires anything.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        chrono::Duration::from_std(ttl)
            .map(|ttl| self.silent_for(now) > ttl)
            .unwrap_or(false)
    }

    /// Marks the record as seen at `at`.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = at;
    }
}

/// Registry membership: every currently known client and its record.
pub type MembershipMap = HashMap<ClientId, LivenessRecord>;
