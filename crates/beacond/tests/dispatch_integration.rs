//! End-to-end dispatch tests over loopback HTTP.
//!
//! Real client notify endpoints are stood up with axum on ephemeral ports;
//! the registry server talks to them through the production HttpNotifier.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use beacon_core::{ClientId, ManualClock};
use beacon_protocol::{
    DispatchRequest, DispatchResponse, DispatchTarget, NotifyRequest, RegisterRequest,
    ResponseStatus,
};
use beacond::dispatch::{Dispatcher, HttpNotifier};
use beacond::registry::spawn_registry;
use beacond::server::{AppState, RegistryServer};
use beacond::snapshot::MemoryStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

type Inbox = Arc<Mutex<Vec<String>>>;

/// Starts a notify endpoint answering with `status`; returns its port.
async fn spawn_client(status: StatusCode, inbox: Inbox) -> u16 {
    async fn notify(
        State((status, inbox)): State<(StatusCode, Inbox)>,
        Json(body): Json<NotifyRequest>,
    ) -> StatusCode {
        inbox.lock().unwrap().push(body.text().to_string());
        status
    }

    let app = Router::new()
        .route("/notify", post(notify))
        .with_state((status, inbox));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// A port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Starts the registry server; returns its address and a shutdown token.
async fn spawn_registry_server() -> (SocketAddr, CancellationToken) {
    let registry = spawn_registry(
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::default()),
    );
    let notifier = HttpNotifier::new(Duration::from_secs(2)).unwrap();
    let dispatcher = Dispatcher::new(registry.clone(), Arc::new(notifier), Duration::from_secs(2));
    let cancel = CancellationToken::new();
    let server = RegistryServer::new(AppState { registry, dispatcher }, cancel.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    (addr, cancel)
}

async fn register(http: &reqwest::Client, addr: SocketAddr, id: &str, port: u16) {
    let response = http
        .post(format!("http://{addr}/register"))
        .json(&RegisterRequest::new(&ClientId::new(id), "127.0.0.1", port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_broadcast_over_http_reports_unreachable_client() {
    let (addr, cancel) = spawn_registry_server().await;
    let http = reqwest::Client::new();

    let inbox_a: Inbox = Arc::default();
    let inbox_c: Inbox = Arc::default();
    let port_a = spawn_client(StatusCode::OK, inbox_a.clone()).await;
    let port_b = closed_port().await;
    let port_c = spawn_client(StatusCode::OK, inbox_c.clone()).await;

    register(&http, addr, "alpha@1", port_a).await;
    register(&http, addr, "bravo@2", port_b).await;
    register(&http, addr, "charlie@3", port_c).await;

    let response = http
        .post(format!("http://{addr}/dispatch"))
        .json(&DispatchRequest::new(&DispatchTarget::All, "standup in 5"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::MULTI_STATUS);
    let body: DispatchResponse = response.json().await.unwrap();
    assert_eq!(body.status, ResponseStatus::Partial);
    assert_eq!(body.failed, vec![ClientId::new("bravo@2")]);
    assert_eq!(
        body.succeeded,
        vec![ClientId::new("alpha@1"), ClientId::new("charlie@3")]
    );

    assert_eq!(*inbox_a.lock().unwrap(), vec!["standup in 5".to_string()]);
    assert_eq!(*inbox_c.lock().unwrap(), vec!["standup in 5".to_string()]);

    // The unreachable client is still registered
    let identities: serde_json::Value = http
        .get(format!("http://{addr}/identities"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(identities["identities"].as_array().unwrap().len(), 3);

    cancel.cancel();
}

#[tokio::test]
async fn test_single_target_error_status_is_failure() {
    let (addr, cancel) = spawn_registry_server().await;
    let http = reqwest::Client::new();

    let inbox: Inbox = Arc::default();
    let port = spawn_client(StatusCode::INTERNAL_SERVER_ERROR, inbox.clone()).await;
    register(&http, addr, "grumpy@1", port).await;

    let response = http
        .post(format!("http://{addr}/send"))
        .json(&serde_json::json!({"clientId": "grumpy@1", "message": "hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(inbox.lock().unwrap().len(), 1);

    cancel.cancel();
}

#[tokio::test]
async fn test_single_target_delivered() {
    let (addr, cancel) = spawn_registry_server().await;
    let http = reqwest::Client::new();

    let inbox: Inbox = Arc::default();
    let port = spawn_client(StatusCode::OK, inbox.clone()).await;
    register(&http, addr, "desk@1", port).await;

    let response = http
        .post(format!("http://{addr}/dispatch"))
        .json(&DispatchRequest::new(
            &DispatchTarget::Client(ClientId::new("desk@1")),
            "lunch",
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(*inbox.lock().unwrap(), vec!["lunch".to_string()]);

    cancel.cancel();
}
