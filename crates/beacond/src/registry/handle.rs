//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to presence events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::time::Duration;

use beacon_core::{ClientId, LivenessRecord};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{PresenceEvent, RegistryCommand, RegistryError};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// handle.register(ClientId::new("desk@1"), "10.0.0.5".into(), 3000).await?;
/// handle.heartbeat(ClientId::new("desk@1")).await?;
///
/// let mut rx = handle.subscribe();
/// while let Ok(event) = rx.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<PresenceEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<PresenceEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Sends a command built around a fresh oneshot and awaits the answer.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Register a client, or overwrite its address if already known.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        client_id: ClientId,
        host: String,
        port: u16,
    ) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Register {
            client_id,
            host,
            port,
            respond_to,
        })
        .await
    }

    /// Refresh a registered client's liveness.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UnknownIdentity` if the client is not registered
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn heartbeat(&self, client_id: ClientId) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Heartbeat {
            client_id,
            respond_to,
        })
        .await?
    }

    /// Evict every client silent for longer than `ttl` as of `now`.
    ///
    /// Returns the evicted identities, sorted.
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Vec<ClientId>, RegistryError> {
        self.request(|tx| RegistryCommand::SweepExpired {
            now,
            ttl,
            respond_to: Some(tx),
        })
        .await
    }

    /// Queue a sweep without waiting for the result.
    ///
    /// Used by the periodic sweeper. Fails only if the actor is gone.
    pub async fn trigger_sweep(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::SweepExpired {
                now,
                ttl,
                respond_to: None,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// All registered identities, sorted.
    pub async fn list_identities(&self) -> Result<Vec<ClientId>, RegistryError> {
        self.request(|respond_to| RegistryCommand::ListIdentities { respond_to })
            .await
    }

    /// All registered clients with their records, sorted by identity.
    pub async fn list_clients(&self) -> Result<Vec<(ClientId, LivenessRecord)>, RegistryError> {
        self.request(|respond_to| RegistryCommand::ListClients { respond_to })
            .await
    }

    /// Look up one client's record.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` if the client is not registered
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn resolve(&self, client_id: ClientId) -> Result<LivenessRecord, RegistryError> {
        let lookup = client_id.clone();
        self.request(|respond_to| RegistryCommand::Resolve {
            client_id: lookup,
            respond_to,
        })
        .await?
        .ok_or(RegistryError::NotFound(client_id))
    }

    /// Write the current membership through the snapshot store.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Persistence` if the write failed
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn flush(&self) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Flush { respond_to })
            .await?
            .map_err(RegistryError::from)
    }

    /// Flush and stop the actor. Later calls on any handle fail with
    /// `ChannelClosed`.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Shutdown { respond_to })
            .await?
            .map_err(RegistryError::from)
    }

    /// Subscribe to presence events.
    ///
    /// Subscribers that fall behind receive `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the registry actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
