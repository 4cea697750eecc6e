//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `PresenceEvent`: Events published by the registry for subscribers

use std::time::Duration;

use beacon_core::{ClientId, LivenessRecord};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::snapshot::SnapshotError;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command that expects an answer carries a oneshot sender. The actor
/// processes commands one at a time, which serializes every mutation of the
/// membership map.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Insert or overwrite the record for a client, stamped with the current time.
    ///
    /// Always succeeds.
    Register {
        client_id: ClientId,
        host: String,
        port: u16,
        respond_to: oneshot::Sender<()>,
    },

    /// Refresh a client's `last_heartbeat`.
    ///
    /// # Errors
    /// - `RegistryError::UnknownIdentity` if the client is not registered
    Heartbeat {
        client_id: ClientId,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Evict every record silent for longer than `ttl` as of `now`.
    ///
    /// The periodic sweeper sends this without a responder.
    SweepExpired {
        now: DateTime<Utc>,
        ttl: Duration,
        respond_to: Option<oneshot::Sender<Vec<ClientId>>>,
    },

    /// List the identities currently registered, sorted.
    ListIdentities {
        respond_to: oneshot::Sender<Vec<ClientId>>,
    },

    /// List identities together with their records, sorted by identity.
    ListClients {
        respond_to: oneshot::Sender<Vec<(ClientId, LivenessRecord)>>,
    },

    /// Look up one client's record.
    Resolve {
        client_id: ClientId,
        respond_to: oneshot::Sender<Option<LivenessRecord>>,
    },

    /// Write the current map through the snapshot store and report the result.
    Flush {
        respond_to: oneshot::Sender<Result<(), SnapshotError>>,
    },

    /// Flush, then stop the actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), SnapshotError>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A heartbeat arrived for a client the registry does not know.
    ///
    /// Recoverable: the client should register again.
    #[error("unknown identity: {0}")]
    UnknownIdentity(ClientId),

    /// The requested client is not registered.
    #[error("client not found: {0}")]
    NotFound(ClientId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,

    /// Writing the snapshot failed.
    #[error("persistence failed: {0}")]
    Persistence(#[from] SnapshotError),
}

// ============================================================================
// Presence Events
// ============================================================================

/// Events published by the registry to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A client registered.
    Registered {
        client_id: ClientId,
        /// `host:port` of the client's notify endpoint
        address: String,
        /// True when the identity was already present (re-registration)
        rejoined: bool,
    },

    /// A client was evicted by the sweep.
    Evicted {
        client_id: ClientId,
        /// Whole seconds since the client was last heard from
        silent_for_secs: i64,
    },
}
