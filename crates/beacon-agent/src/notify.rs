//! Client-side notify endpoint.
//!
//! The registry delivers messages with `POST /notify {message}`. Each message
//! is handed to a [`NotificationSink`]; a missing or blank message is shown
//! as [`DEFAULT_NOTIFICATION`](beacon_protocol::DEFAULT_NOTIFICATION).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use beacon_protocol::{routes, NotifyRequest, StatusResponse};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Sinks
// ============================================================================

/// A sink could not show the notification.
#[derive(Debug, Error)]
#[error("notification sink failed: {0}")]
pub struct SinkError(pub String);

/// Where incoming notifications end up.
#[async_trait]
pub trait NotificationSink: Send + Sync + fmt::Debug {
    async fn deliver(&self, message: &str) -> Result<(), SinkError>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, message: &str) -> Result<(), SinkError> {
        info!(text = message, "Notification received");
        Ok(())
    }
}

/// Runs a program per notification, with the message as its last argument.
///
/// The program is not waited on before answering the registry; its exit
/// status is logged when it finishes.
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Builds a sink from `[program, args...]`. Returns `None` for an empty list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl NotificationSink for CommandSink {
    async fn deliver(&self, message: &str) -> Result<(), SinkError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(message)
            .spawn()
            .map_err(|e| SinkError(format!("failed to run {}: {e}", self.program)))?;

        let program = self.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(program = %program, "Notify command finished"),
                Ok(status) => warn!(program = %program, status = %status, "Notify command failed"),
                Err(e) => warn!(program = %program, error = %e, "Notify command could not be awaited"),
            }
        });
        Ok(())
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Builds the `/notify` router.
pub fn notify_router(sink: Arc<dyn NotificationSink>) -> Router {
    Router::new()
        .route(routes::NOTIFY, post(notify))
        .with_state(sink)
}

async fn notify(
    State(sink): State<Arc<dyn NotificationSink>>,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusResponse::error(rejection.body_text())),
            )
                .into_response();
        }
    };

    match sink.deliver(request.text()).await {
        Ok(()) => Json(StatusResponse::ok_with("Notification displayed")).into_response(),
        Err(e) => {
            warn!(error = %e, "Could not show notification");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse::error(e.to_string())),
            )
                .into_response()
        }
    }
}

/// Serves the notify endpoint on `listener` until `cancel_token` fires.
pub async fn serve_notify(
    listener: TcpListener,
    sink: Arc<dyn NotificationSink>,
    cancel_token: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Notify endpoint listening");
    }
    axum::serve(listener, notify_router(sink))
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
}
