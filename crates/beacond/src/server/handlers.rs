//! Route handlers.
//!
//! Each handler validates its body, forwards one call to the registry or the
//! dispatcher and maps the answer onto a wire response.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use beacon_protocol::{
    ClientEntry, ClientsResponse, DispatchRequest, DispatchResponse, HeartbeatRequest,
    IdentitiesResponse, RegisterRequest, StatusResponse,
};
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::AppState;

/// `GET /health`
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

/// `POST /register`
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Json(request) = payload?;
    let (client_id, host, port) = request.into_parts()?;

    state.registry.register(client_id, host, port).await?;

    Ok(Json(StatusResponse::ok()))
}

/// `POST /heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Json(request) = payload?;
    let client_id = request.into_identity()?;

    state.registry.heartbeat(client_id).await?;

    Ok(Json(StatusResponse::ok()))
}

/// `POST /dispatch` and `POST /send`
///
/// 200 when every target accepted, 207 when a broadcast partially failed.
pub async fn dispatch(
    State(state): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DispatchResponse>)> {
    let Json(request) = payload?;
    let (target, message) = request.into_parts()?;

    debug!(dispatch_target = %target, "Dispatch requested");
    let outcome = state.dispatcher.dispatch(&target, &message).await?;

    let status = if outcome.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    Ok((status, Json(DispatchResponse::from_result(outcome.result()))))
}

/// `GET /identities`
pub async fn identities(State(state): State<AppState>) -> ApiResult<Json<IdentitiesResponse>> {
    let identities = state.registry.list_identities().await?;
    Ok(Json(IdentitiesResponse { identities }))
}

/// `GET /clients`
pub async fn clients(State(state): State<AppState>) -> ApiResult<Json<ClientsResponse>> {
    let clients = state
        .registry
        .list_clients()
        .await?
        .into_iter()
        .map(|(identity, record)| ClientEntry::from_record(identity, &record))
        .collect();
    Ok(Json(ClientsResponse { clients }))
}
