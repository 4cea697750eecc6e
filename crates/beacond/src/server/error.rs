//! HTTP error mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_core::DomainError;
use beacon_protocol::StatusResponse;
use thiserror::Error;
use tracing::error;

use crate::dispatch::DispatchError;
use crate::registry::RegistryError;

/// Errors surfaced to HTTP callers as `{status:"error", message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed body or missing field. Caller error, retrying won't help.
    #[error("{0}")]
    BadRequest(String),

    /// Heartbeat for an identity the registry does not know.
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    /// Dispatch target is not registered.
    #[error("client not found: {0}")]
    NotFound(String),

    /// A single-target delivery failed.
    #[error("{0}")]
    DeliveryFailed(String),

    /// The registry is shutting down or gone.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownIdentity(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(StatusResponse::error(self.to_string()))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownIdentity(id) => Self::UnknownIdentity(id.to_string()),
            RegistryError::NotFound(id) => Self::NotFound(id.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound(id) => Self::NotFound(id.to_string()),
            DispatchError::DeliveryFailed { client_id, source } => Self::DeliveryFailed(format!(
                "delivery failed for: {} ({source})",
                client_id.label()
            )),
            DispatchError::Registry(e) => e.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::ClientId;

    use crate::dispatch::DeliveryError;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RegistryError::UnknownIdentity(ClientId::new("a@1"))).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RegistryError::ChannelClosed).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_delivery_failure_names_label() {
        let err = ApiError::from(DispatchError::DeliveryFailed {
            client_id: ClientId::new("desk@abc"),
            source: DeliveryError::Http { status: 500 },
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            err.to_string(),
            "delivery failed for: desk (client answered HTTP 500)"
        );
    }

    #[test]
    fn test_missing_field_is_bad_request() {
        let err = ApiError::from(DomainError::MissingField { field: "identity" });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Missing required field: identity");
    }
}
