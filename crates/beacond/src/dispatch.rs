//! Notification fan-out.
//!
//! The [`Dispatcher`] resolves a [`DispatchTarget`] against the registry and
//! hands the message to a [`Notifier`] once per recipient. Broadcast attempts
//! run concurrently and the call returns only after every attempt settled.
//! Dispatch never mutates the registry: a client that cannot be reached stays
//! registered until the sweep evicts it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{ClientId, DispatchResult, LivenessRecord};
use beacon_protocol::{routes, DispatchTarget, NotifyRequest};
use futures::future::join_all;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::{RegistryError, RegistryHandle};

/// Upper bound for a single delivery attempt.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Delivery
// ============================================================================

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The attempt did not settle within the delivery timeout.
    #[error("delivery timed out")]
    Timeout,

    /// The client answered with a non-2xx status.
    #[error("client answered HTTP {status}")]
    Http { status: u16 },

    /// The client could not be reached.
    #[error("network error: {0}")]
    Network(String),
}

/// Delivers one message to one client.
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn notify(
        &self,
        client_id: &ClientId,
        record: &LivenessRecord,
        message: &str,
    ) -> Result<(), DeliveryError>;
}

/// Posts `{message}` to the client's `/notify` endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    /// Creates a notifier whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn endpoint(record: &LivenessRecord) -> String {
        format!("http://{}{}", record.address(), routes::NOTIFY)
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(
        &self,
        client_id: &ClientId,
        record: &LivenessRecord,
        message: &str,
    ) -> Result<(), DeliveryError> {
        let url = Self::endpoint(record);
        debug!(client_id = %client_id, url = %url, "Delivering notification");

        let response = self
            .client
            .post(&url)
            .json(&NotifyRequest::new(message))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Http {
                status: status.as_u16(),
            })
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Successful dispatch outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every attempted target accepted the message.
    Delivered(DispatchResult),
    /// A broadcast in which at least one target failed.
    PartialFailure(DispatchResult),
}

impl DispatchOutcome {
    fn from_result(result: DispatchResult) -> Self {
        if result.has_failures() {
            Self::PartialFailure(result)
        } else {
            Self::Delivered(result)
        }
    }

    /// The per-target breakdown.
    pub fn result(&self) -> &DispatchResult {
        match self {
            Self::Delivered(result) | Self::PartialFailure(result) => result,
        }
    }

    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialFailure(_))
    }
}

/// Errors returned by [`Dispatcher::dispatch`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The single target is not registered. No delivery was attempted.
    #[error("client not found: {0}")]
    NotFound(ClientId),

    /// The single target could not be notified.
    #[error("delivery to {client_id} failed: {source}")]
    DeliveryFailed {
        client_id: ClientId,
        source: DeliveryError,
    },

    /// The registry could not be queried.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Fans messages out to registered clients.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: RegistryHandle,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher. Every attempt is cut off after `timeout`,
    /// whatever the notifier does.
    pub fn new(registry: RegistryHandle, notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            registry,
            notifier,
            timeout,
        }
    }

    /// Sends `message` to `target`.
    ///
    /// # Errors
    ///
    /// - `DispatchError::NotFound` if a single target is not registered
    /// - `DispatchError::DeliveryFailed` if a single target could not be notified
    /// - `DispatchError::Registry` if the registry actor is gone
    ///
    /// Broadcast failures are never errors; they come back as
    /// [`DispatchOutcome::PartialFailure`].
    pub async fn dispatch(
        &self,
        target: &DispatchTarget,
        message: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        match target {
            DispatchTarget::Client(client_id) => self.dispatch_one(client_id, message).await,
            DispatchTarget::All => self.broadcast(message).await,
        }
    }

    async fn dispatch_one(
        &self,
        client_id: &ClientId,
        message: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let record = match self.registry.resolve(client_id.clone()).await {
            Ok(record) => record,
            Err(RegistryError::NotFound(id)) => {
                debug!(client_id = %id, "Dispatch target not registered");
                return Err(DispatchError::NotFound(id));
            }
            Err(e) => return Err(e.into()),
        };

        match self.attempt(client_id, &record, message).await {
            Ok(()) => {
                info!(client_id = %client_id, "Notification delivered");
                let mut result = DispatchResult::new();
                result.record_success(client_id.clone());
                Ok(DispatchOutcome::Delivered(result))
            }
            Err(source) => {
                warn!(client_id = %client_id, error = %source, "Notification delivery failed");
                Err(DispatchError::DeliveryFailed {
                    client_id: client_id.clone(),
                    source,
                })
            }
        }
    }

    async fn broadcast(&self, message: &str) -> Result<DispatchOutcome, DispatchError> {
        let clients = self.registry.list_clients().await?;

        let attempts = clients.iter().map(|(client_id, record)| async move {
            let outcome = self.attempt(client_id, record, message).await;
            (client_id, outcome)
        });

        let mut result = DispatchResult::new();
        for (client_id, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => result.record_success(client_id.clone()),
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "Broadcast delivery failed");
                    result.record_failure(client_id.clone());
                }
            }
        }

        info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "Broadcast finished"
        );

        Ok(DispatchOutcome::from_result(result))
    }

    async fn attempt(
        &self,
        client_id: &ClientId,
        record: &LivenessRecord,
        message: &str,
    ) -> Result<(), DeliveryError> {
        tokio::time::timeout(self.timeout, self.notifier.notify(client_id, record, message))
            .await
            .map_err(|_| DeliveryError::Timeout)?
    }
}
