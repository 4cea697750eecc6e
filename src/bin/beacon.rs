//! beacon - client agent and operator commands
//!
//! # Usage
//!
//! ```text
//! beacon run                       # register, heartbeat and show notifications
//! beacon run --registry http://10.0.0.1:4000 --port 3001
//! beacon identity                  # print this machine's identity
//! beacon list                      # identities the registry currently knows
//! beacon send --to __ALL__ "standup in 5"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beacon_agent::identity::{default_label, load_or_create};
use beacon_agent::net::advertise_host;
use beacon_agent::notify::serve_notify;
use beacon_agent::{
    AgentConfig, CommandSink, HttpRegistryClient, LogSink, NotificationSink, RegistrationAgent,
};
use beacon_protocol::{DispatchTarget, ResponseStatus};

// ============================================================================
// CLI Arguments
// ============================================================================

/// beacon - stay reachable for notifications
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Registry base URL
    #[arg(long, global = true)]
    registry: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register with the registry and receive notifications (default)
    Run {
        /// Port for the notify endpoint
        #[arg(short, long)]
        port: Option<u16>,

        /// Label for a newly created identity
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Print this client's identity, creating it if needed
    Identity,
    /// List identities known to the registry
    List {
        /// Show address and last heartbeat too
        #[arg(short, long)]
        long: bool,
    },
    /// Send a message to one client or to everyone
    Send {
        /// Target identity, or __ALL__ for every client
        #[arg(long)]
        to: String,

        /// Message text
        message: String,
    },
}

fn load_config(args: &Args) -> Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::from_file(path)?,
        None => AgentConfig::default(),
    };
    if let Some(registry) = &args.registry {
        config.registry_url = registry.clone();
    }
    Ok(config)
}

/// Exit status of `send` when some deliveries of a broadcast failed.
const PARTIAL_DELIVERY_EXIT: u8 = 2;

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let mut config = load_config(&args)?;

    match args.command.unwrap_or(Command::Run {
        port: None,
        label: None,
    }) {
        Command::Run { port, label } => {
            if let Some(port) = port {
                config.listen_port = port;
            }
            if label.is_some() {
                config.label = label;
            }
            config.validate()?;
            run_agent(config)?;
        }
        Command::Identity => {
            let identity = resolve_identity(&config)?;
            println!("{identity}");
        }
        Command::List { long } => list(config, long)?,
        Command::Send { to, message } => return send(config, &to, &message),
    }
    Ok(ExitCode::SUCCESS)
}

fn resolve_identity(config: &AgentConfig) -> Result<beacon_core::ClientId> {
    let label = config.label.clone().unwrap_or_else(default_label);
    load_or_create(&config.identity_path, &label).with_context(|| {
        format!(
            "Failed to load identity from {}",
            config.identity_path.display()
        )
    })
}

// ============================================================================
// Agent
// ============================================================================

#[tokio::main]
async fn run_agent(config: AgentConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("beacon=info".parse()?)
                .add_directive("beacon_agent=info".parse()?),
        )
        .init();

    let identity = resolve_identity(&config)?;
    let host = advertise_host(config.advertise_host.as_deref(), &config.registry_url).await;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        client_id = %identity,
        registry = %config.registry_url,
        host = %host,
        port = config.listen_port,
        "beacon agent starting"
    );

    let cancel_token = CancellationToken::new();

    let sink: Arc<dyn NotificationSink> = match config
        .notify_command
        .as_deref()
        .and_then(CommandSink::from_argv)
    {
        Some(command) => Arc::new(command),
        None => Arc::new(LogSink),
    };

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("Failed to bind notify port {}", config.listen_port))?;
    let notify_server = tokio::spawn(serve_notify(listener, sink, cancel_token.clone()));

    let api = HttpRegistryClient::new(config.registry_url.clone(), config.request_timeout())?;
    let agent = RegistrationAgent::new(
        identity,
        host,
        config.listen_port,
        Arc::new(api),
        config.agent_options(),
    );

    // Registration gives up after the bounded retries; try again a period later
    let starter = {
        let agent = agent.clone();
        let cancel_token = cancel_token.clone();
        let pause = config.agent_options().heartbeat_interval;
        tokio::spawn(async move {
            while let Err(e) = agent.start().await {
                warn!(error = %e, "Registration failed, trying again later");
                tokio::select! {
                    _ = sleep(pause) => {}
                    _ = cancel_token.cancelled() => break,
                }
            }
        })
    };

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");

    cancel_token.cancel();
    agent.shutdown().await;
    let _ = starter.await;

    match notify_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Notify endpoint failed"),
        Err(e) => error!(error = %e, "Notify endpoint task panicked"),
    }

    info!("beacon agent stopped");
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

// ============================================================================
// Operator Commands
// ============================================================================

#[tokio::main]
async fn list(config: AgentConfig, long: bool) -> Result<()> {
    let client = HttpRegistryClient::new(config.registry_url.clone(), config.request_timeout())?;

    if long {
        let clients = client.list_clients().await?;
        if clients.is_empty() {
            println!("No clients registered.");
        }
        for entry in clients {
            println!(
                "{}\t{}:{}\t{}",
                entry.identity,
                entry.host,
                entry.port,
                entry.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    } else {
        let identities = client.list_identities().await?;
        if identities.is_empty() {
            println!("No clients registered.");
        }
        for identity in identities {
            println!("{identity}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn send(config: AgentConfig, to: &str, message: &str) -> Result<ExitCode> {
    let target = DispatchTarget::parse(to).context("Invalid target")?;
    let client = HttpRegistryClient::new(config.registry_url.clone(), config.request_timeout())?;

    let response = client.dispatch(&target, message).await?;

    match response.status {
        ResponseStatus::Partial => {
            let failed: Vec<&str> = response.failed.iter().map(|id| id.label()).collect();
            println!(
                "Delivered to {} client(s); failed for: {}",
                response.succeeded.len(),
                failed.join(", ")
            );
            Ok(ExitCode::from(PARTIAL_DELIVERY_EXIT))
        }
        _ => {
            println!("Delivered to {} client(s).", response.succeeded.len());
            Ok(ExitCode::SUCCESS)
        }
    }
}
