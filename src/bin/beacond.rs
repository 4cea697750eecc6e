//! beacond - presence registry and notification dispatcher
//!
//! Clients register their notify endpoint here and keep it alive with
//! heartbeats; operators dispatch messages to one client or to all of them.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: listen on 0.0.0.0:4000, 3 minute TTL, sweep every 30s
//! beacond
//!
//! # With a config file and overrides
//! beacond --config /etc/beacon/beacond.toml --listen 0.0.0.0:5000
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use beacon_core::{Clock, SystemClock};
use beacond::config::RegistryConfig;
use beacond::dispatch::{Dispatcher, HttpNotifier};
use beacond::registry::{spawn_registry, spawn_sweeper};
use beacond::server::{AppState, RegistryServer};
use beacond::snapshot::JsonFileStore;

/// beacon registry daemon
#[derive(Parser, Debug)]
#[command(name = "beacond", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Membership snapshot file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Seconds of silence before a client is evicted
    #[arg(long)]
    ttl_secs: Option<u64>,

    /// Seconds between expiry sweeps
    #[arg(long)]
    sweep_interval_secs: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<RegistryConfig> {
        let mut config = match &self.config {
            Some(path) => RegistryConfig::from_file(path)?,
            None => RegistryConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(snapshot) = self.snapshot {
            config.snapshot_path = snapshot;
        }
        if let Some(ttl) = self.ttl_secs {
            config.ttl_secs = ttl;
        }
        if let Some(interval) = self.sweep_interval_secs {
            config.sweep_interval_secs = interval;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("beacond=info".parse()?)
                .add_directive("beacon_core=info".parse()?)
                .add_directive("beacon_protocol=info".parse()?),
        )
        .init();

    let config = Args::parse().into_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        listen = %config.listen,
        snapshot = %config.snapshot_path.display(),
        ttl_secs = config.ttl_secs,
        sweep_interval_secs = config.sweep_interval_secs,
        "beacon registry starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(JsonFileStore::new(&config.snapshot_path));
    let registry = spawn_registry(store, Arc::clone(&clock));
    info!("Presence registry started");

    let sweeper = spawn_sweeper(
        registry.clone(),
        clock,
        config.ttl(),
        config.sweep_interval(),
        cancel_token.clone(),
    );

    let notifier =
        HttpNotifier::new(config.delivery_timeout()).context("Failed to build HTTP client")?;
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(notifier),
        config.delivery_timeout(),
    );

    let server = RegistryServer::new(
        AppState {
            registry: registry.clone(),
            dispatcher,
        },
        cancel_token.clone(),
    );

    let served = server.run(config.listen).await;

    // Stop the sweeper even if the server failed on its own
    cancel_token.cancel();
    let _ = sweeper.await;

    if let Err(e) = registry.shutdown().await {
        error!(error = %e, "Final snapshot flush failed");
    }

    if let Err(e) = served {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("beacon registry stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
