//! HTTP front end of the registry daemon.
//!
//! The server:
//! - Exposes register, heartbeat, dispatch and listing routes over axum
//! - Logs presence events published by the registry
//! - Supports graceful shutdown via CancellationToken
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Handler errors become JSON error bodies via [`ApiError`]

mod error;
mod handlers;

pub use error::{ApiError, ApiResult};

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use beacon_protocol::routes;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::registry::{PresenceEvent, RegistryHandle};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub dispatcher: Dispatcher,
}

/// Builds the registry router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(routes::HEALTH, get(handlers::health))
        .route(routes::REGISTER, post(handlers::register))
        .route(routes::HEARTBEAT, post(handlers::heartbeat))
        .route(routes::DISPATCH, post(handlers::dispatch))
        .route(routes::SEND, post(handlers::dispatch))
        .route(routes::IDENTITIES, get(handlers::identities))
        .route(routes::CLIENTS, get(handlers::clients))
        .with_state(state)
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("server error: {0}")]
    Serve(String),
}

/// HTTP server for the registry.
pub struct RegistryServer {
    state: AppState,
    cancel_token: CancellationToken,
}

impl RegistryServer {
    pub fn new(state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            state,
            cancel_token,
        }
    }

    /// Binds `addr` and serves until cancelled.
    pub async fn run(self, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until cancelled.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Registry server listening");
        }

        spawn_event_logger(self.state.registry.subscribe(), self.cancel_token.clone());

        let cancel = self.cancel_token.clone();
        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("Registry server stopped");
        Ok(())
    }
}

/// Logs registry events until cancelled or the registry goes away.
fn spawn_event_logger(
    mut event_rx: broadcast::Receiver<PresenceEvent>,
    cancel_token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Event logger shutting down");
                    break;
                }

                result = event_rx.recv() => {
                    match result {
                        Ok(PresenceEvent::Registered { client_id, address, rejoined }) => {
                            debug!(client_id = %client_id, address = %address, rejoined, "Presence: registered");
                        }
                        Ok(PresenceEvent::Evicted { client_id, silent_for_secs }) => {
                            debug!(client_id = %client_id, silent_for_secs, "Presence: evicted");
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Event logger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Event channel closed");
                            break;
                        }
                    }
                }
            }
        }
    });
}
