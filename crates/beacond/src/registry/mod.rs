//! Presence registry using the Actor pattern.
//!
//! The registry is the single owner of the identity → liveness map. It
//! receives commands via a tokio mpsc channel, publishes presence events
//! on a broadcast channel and queues snapshots to a background persister.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │  HTTP handlers  │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! │  Sweeper task   │     └─────────────────┘     └──────────────────┘
//! └─────────────────┘             │
//!         RegistryCommand         │ PersistRequest
//!         (mpsc channel)          ▼ (unbounded mpsc)
//!                         ┌─────────────────┐
//!                         │    Persister    │──▶ SnapshotStore
//!                         └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - A snapshot that cannot be loaded is logged and the registry starts empty
//! - Channel closure stops background tasks gracefully

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Clock, MembershipMap};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod actor;
mod commands;
mod handle;
mod persist;

pub use actor::RegistryActor;
pub use commands::{PresenceEvent, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

use crate::snapshot::SnapshotStore;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// How long a client may stay silent before it is evicted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(180);

/// How often the sweeper checks for expired clients.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the registry actor and its persister and return a handle.
///
/// This function:
/// 1. Loads the last snapshot from `store` (an unreadable snapshot is
///    logged and the registry starts empty)
/// 2. Spawns the persister on a tokio task
/// 3. Spawns the RegistryActor on a tokio task
/// 4. Returns a RegistryHandle for client use
///
/// Expiry is not started here; see [`spawn_sweeper`].
pub fn spawn_registry(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> RegistryHandle {
    let initial = match store.load() {
        Ok(snapshot) => {
            info!(clients = snapshot.len(), "Loaded membership snapshot");
            snapshot
        }
        Err(e) => {
            warn!(error = %e, "Could not load membership snapshot, starting empty");
            MembershipMap::new()
        }
    };

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (persist_tx, persist_rx) = mpsc::unbounded_channel();

    persist::spawn_persister(store, persist_rx);

    let actor = RegistryActor::new(cmd_rx, initial, clock, persist_tx, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}

/// Spawn the periodic expiry sweep.
///
/// Every `period` the task asks the registry to evict clients silent for
/// longer than `ttl`. It stops when `cancel` fires or the registry is gone.
pub fn spawn_sweeper(
    handle: RegistryHandle,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Sweeper stopping: cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if handle.trigger_sweep(clock.now(), ttl).await.is_err() {
                        debug!("Sweeper stopping: registry channel closed");
                        break;
                    }
                    debug!(ttl_secs = ttl.as_secs(), "Triggered expiry sweep");
                }
            }
        }
    })
}
