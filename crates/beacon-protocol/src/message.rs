//! Request and response bodies.
//!
//! Request fields are optional on the wire so that a missing field can be
//! reported as a 400 with a clear message instead of a generic
//! deserialization failure. Each request validates into typed parts.

use beacon_core::{ClientId, DispatchResult, DomainError, DomainResult, LivenessRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::routes::{DispatchTarget, ALL_CLIENTS};

/// Text shown when a notify call carries no message.
pub const DEFAULT_NOTIFICATION: &str = "New notification";

// ============================================================================
// Requests
// ============================================================================

/// Body of `POST /register`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Client identity
    #[serde(default, alias = "clientId", skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// Host the client's notify endpoint is reachable on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port of the client's notify endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl RegisterRequest {
    /// Creates a complete register request.
    pub fn new(identity: &ClientId, host: impl Into<String>, port: u16) -> Self {
        Self {
            identity: Some(identity.to_string()),
            host: Some(host.into()),
            port: Some(port),
        }
    }

    /// Validates the request into `(identity, host, port)`.
    pub fn into_parts(self) -> DomainResult<(ClientId, String, u16)> {
        let identity = ClientId::parse(self.identity.as_deref().unwrap_or_default())?;
        // The broadcast sentinel could never be targeted on its own
        if identity.as_str() == ALL_CLIENTS {
            return Err(DomainError::InvalidFieldValue {
                field: "identity".to_string(),
                value: ALL_CLIENTS.to_string(),
                expected: "a client identity other than the broadcast target".to_string(),
            });
        }
        let host = non_blank(self.host, "host")?;
        let port = match self.port {
            None => return Err(DomainError::MissingField { field: "port" }),
            Some(0) => {
                return Err(DomainError::InvalidFieldValue {
                    field: "port".to_string(),
                    value: "0".to_string(),
                    expected: "1-65535".to_string(),
                })
            }
            Some(p) => p,
        };
        Ok((identity, host, port))
    }
}

/// Body of `POST /heartbeat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Client identity
    #[serde(default, alias = "clientId", skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

impl HeartbeatRequest {
    /// Creates a heartbeat for `identity`.
    pub fn new(identity: &ClientId) -> Self {
        Self {
            identity: Some(identity.to_string()),
        }
    }

    /// Validates the request into the identity.
    pub fn into_identity(self) -> DomainResult<ClientId> {
        ClientId::parse(self.identity.as_deref().unwrap_or_default())
    }
}

/// Body of `POST /dispatch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// A client identity or [`crate::ALL_CLIENTS`]
    #[serde(default, alias = "clientId", skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Text to deliver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DispatchRequest {
    /// Creates a dispatch request.
    pub fn new(target: &DispatchTarget, message: impl Into<String>) -> Self {
        Self {
            target: Some(target.as_wire().to_string()),
            message: Some(message.into()),
        }
    }

    /// Validates the request into `(target, message)`.
    pub fn into_parts(self) -> DomainResult<(DispatchTarget, String)> {
        let target = match self.target.as_deref() {
            Some(raw) if !raw.trim().is_empty() => DispatchTarget::parse(raw)?,
            _ => return Err(DomainError::MissingField { field: "target" }),
        };
        let message = non_blank(self.message, "message")?;
        Ok((target, message))
    }
}

/// Body of the client-side `POST /notify`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyRequest {
    /// Text to show; [`DEFAULT_NOTIFICATION`] when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NotifyRequest {
    /// Creates a notify body.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// Returns the message, falling back to [`DEFAULT_NOTIFICATION`].
    pub fn text(&self) -> &str {
        match self.message.as_deref() {
            Some(m) if !m.trim().is_empty() => m,
            _ => DEFAULT_NOTIFICATION,
        }
    }
}

fn non_blank(value: Option<String>, field: &'static str) -> DomainResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DomainError::MissingField { field }),
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Outcome label carried by every response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Partial,
    Error,
}

/// Generic `{status, message?}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ResponseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    /// `{status:"ok"}`
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: None,
        }
    }

    /// `{status:"ok", message}`
    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: Some(message.into()),
        }
    }

    /// `{status:"error", message}`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
        }
    }
}

/// Body of a dispatch response (200 or 207).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub status: ResponseStatus,

    #[serde(default)]
    pub succeeded: Vec<ClientId>,

    #[serde(default)]
    pub failed: Vec<ClientId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DispatchResponse {
    /// Builds the body from an aggregated result.
    ///
    /// The status is `partial` whenever any target failed.
    pub fn from_result(result: &DispatchResult) -> Self {
        let succeeded: Vec<ClientId> = result.succeeded.iter().cloned().collect();
        let failed: Vec<ClientId> = result.failed.iter().cloned().collect();

        if failed.is_empty() {
            Self {
                status: ResponseStatus::Ok,
                message: Some(format!("delivered to {} client(s)", succeeded.len())),
                succeeded,
                failed,
            }
        } else {
            let labels: Vec<&str> = failed.iter().map(ClientId::label).collect();
            Self {
                status: ResponseStatus::Partial,
                message: Some(format!("delivery failed for: {}", labels.join(", "))),
                succeeded,
                failed,
            }
        }
    }
}

/// Body of `GET /identities`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitiesResponse {
    pub identities: Vec<ClientId>,
}

/// One row of `GET /clients`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub identity: ClientId,
    pub host: String,
    pub port: u16,
    pub last_heartbeat: DateTime<Utc>,
}

impl ClientEntry {
    /// Builds a row from a registry record.
    pub fn from_record(identity: ClientId, record: &LivenessRecord) -> Self {
        Self {
            identity,
            host: record.host.clone(),
            port: record.port,
            last_heartbeat: record.last_heartbeat,
        }
    }
}

/// Body of `GET /clients`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientsResponse {
    pub clients: Vec<ClientEntry>,
}
