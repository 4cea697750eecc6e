//! Command-line smoke tests for the `beacon` binary.

use std::fs;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ClientId, ManualClock};
use beacond::dispatch::{Dispatcher, HttpNotifier};
use beacond::registry::spawn_registry;
use beacond::server::{AppState, RegistryServer};
use beacond::snapshot::MemoryStore;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn write_config(dir: &TempDir, extra: &str) -> std::path::PathBuf {
    let path = dir.path().join("beacon.toml");
    let identity = dir.path().join("state").join("client-id.txt");
    fs::write(
        &path,
        format!(
            "identity_path = {:?}\nlabel = \"ci-box\"\n{extra}",
            identity.display().to_string()
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_identity_is_created_once_and_reused() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "");

    let run = || {
        let output = Command::new(env!("CARGO_BIN_EXE_beacon"))
            .arg("--config")
            .arg(&config)
            .arg("identity")
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    };

    let first = run();
    let second = run();

    assert!(first.starts_with("ci-box@"));
    assert_eq!(first, second);
}

#[test]
fn test_send_to_unreachable_registry_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "request_timeout_secs = 1\n");

    let output = Command::new(env!("CARGO_BIN_EXE_beacon"))
        .arg("--config")
        .arg(&config)
        .args(["--registry", "http://127.0.0.1:9"])
        .args(["send", "--to", "__ALL__", "hello"])
        .output()
        .unwrap();

    assert!(!output.status.success());
}

#[tokio::test]
async fn test_send_with_failed_delivery_exits_with_two() {
    let registry = spawn_registry(
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::default()),
    );
    let notifier = HttpNotifier::new(Duration::from_secs(1)).unwrap();
    let dispatcher = Dispatcher::new(registry.clone(), Arc::new(notifier), Duration::from_secs(1));
    let cancel = CancellationToken::new();
    let server = RegistryServer::new(
        AppState {
            registry: registry.clone(),
            dispatcher,
        },
        cancel.clone(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });

    // Registered, but nothing listens on its notify port
    let dead_port = {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        unused.local_addr().unwrap().port()
    };
    registry
        .register(ClientId::new("gone@1"), "127.0.0.1".to_string(), dead_port)
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "");
    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_beacon"))
        .arg("--config")
        .arg(&config)
        .args(["--registry", &format!("http://{addr}")])
        .args(["send", "--to", "__ALL__", "hello"])
        .output()
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("failed for: gone"));
    cancel.cancel();
}

#[test]
fn test_beacond_rejects_zero_ttl() {
    let output = Command::new(env!("CARGO_BIN_EXE_beacond"))
        .args(["--ttl-secs", "0"])
        .output()
        .unwrap();

    assert!(!output.status.success());
}
