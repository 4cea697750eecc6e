//! Background snapshot writer.
//!
//! The actor never touches the disk itself. After each mutation it queues a
//! full copy of the map here; the persister writes requests in order on the
//! blocking pool, collapsing any backlog down to the newest copy.

use std::sync::Arc;

use beacon_core::MembershipMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::snapshot::{SnapshotError, SnapshotStore};

/// One queued write. `ack` is set for explicit flushes.
#[derive(Debug)]
pub(crate) struct PersistRequest {
    pub snapshot: MembershipMap,
    pub ack: Option<oneshot::Sender<Result<(), SnapshotError>>>,
}

/// Spawns the persister. It stops once every sender is dropped and the
/// queue is drained.
pub(crate) fn spawn_persister(
    store: Arc<dyn SnapshotStore>,
    mut requests: mpsc::UnboundedReceiver<PersistRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(first) = requests.recv().await {
            let mut latest = first.snapshot;
            let mut acks: Vec<_> = first.ack.into_iter().collect();

            while let Ok(next) = requests.try_recv() {
                latest = next.snapshot;
                acks.extend(next.ack);
            }

            let clients = latest.len();
            let result = save(Arc::clone(&store), latest).await;
            match &result {
                Ok(()) => debug!(clients, "Snapshot persisted"),
                // In-memory state stays authoritative; the next mutation retries.
                Err(e) => error!(error = %e, clients, "Failed to persist snapshot"),
            }

            for ack in acks {
                let _ = ack.send(result.clone());
            }
        }

        debug!("Persister stopping: registry closed");
    })
}

async fn save(store: Arc<dyn SnapshotStore>, snapshot: MembershipMap) -> Result<(), SnapshotError> {
    tokio::task::spawn_blocking(move || store.save(&snapshot))
        .await
        .unwrap_or_else(|e| Err(SnapshotError::Unavailable(format!("save task failed: {e}"))))
}
