//! Registry actor - owns the membership map and processes commands.
//!
//! The RegistryActor is the single owner of presence state in the daemon.
//! It receives commands via an mpsc channel, publishes events via broadcast
//! and hands a copy of the map to the persister after every mutation.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are ignored or logged, never unwrapped

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ClientId, Clock, LivenessRecord, MembershipMap};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::commands::{PresenceEvent, RegistryCommand, RegistryError};
use super::persist::PersistRequest;
use crate::snapshot::SnapshotError;

/// Whether the run loop keeps going after a command.
enum Flow {
    Continue,
    Stop,
}

/// The registry actor - owns all presence state.
///
/// Commands are processed sequentially within a single task, so register,
/// heartbeat and sweep never observe each other half-way.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Identity → liveness record
    clients: MembershipMap,

    /// Time source for heartbeat stamps
    clock: Arc<dyn Clock>,

    /// Queue to the snapshot persister
    persist_tx: mpsc::UnboundedSender<PersistRequest>,

    /// Event publisher for subscribers
    event_publisher: broadcast::Sender<PresenceEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor seeded with `initial` membership.
    pub(crate) fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        initial: MembershipMap,
        clock: Arc<dyn Clock>,
        persist_tx: mpsc::UnboundedSender<PersistRequest>,
        event_publisher: broadcast::Sender<PresenceEvent>,
    ) -> Self {
        Self {
            receiver,
            clients: initial,
            clock,
            persist_tx,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until a `Shutdown` arrives or every handle is
    /// dropped. In the latter case the map is queued for one last write.
    pub async fn run(mut self) {
        info!(clients = self.clients.len(), "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            if let Flow::Stop = self.handle_command(cmd) {
                info!(clients = self.clients.len(), "Registry actor stopped by shutdown");
                return;
            }
        }

        self.queue_persist(None);
        info!(clients = self.clients.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) -> Flow {
        match cmd {
            RegistryCommand::Register {
                client_id,
                host,
                port,
                respond_to,
            } => {
                self.handle_register(client_id, host, port);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(());
            }
            RegistryCommand::Heartbeat {
                client_id,
                respond_to,
            } => {
                let result = self.handle_heartbeat(client_id);
                let _ = respond_to.send(result);
            }
            RegistryCommand::SweepExpired {
                now,
                ttl,
                respond_to,
            } => {
                let evicted = self.handle_sweep_expired(now, ttl);
                if let Some(tx) = respond_to {
                    let _ = tx.send(evicted);
                }
            }
            RegistryCommand::ListIdentities { respond_to } => {
                let _ = respond_to.send(self.handle_list_identities());
            }
            RegistryCommand::ListClients { respond_to } => {
                let _ = respond_to.send(self.handle_list_clients());
            }
            RegistryCommand::Resolve {
                client_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.clients.get(&client_id).cloned());
            }
            RegistryCommand::Flush { respond_to } => {
                self.queue_persist(Some(respond_to));
            }
            RegistryCommand::Shutdown { respond_to } => {
                self.queue_persist(Some(respond_to));
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Upserts a client record with `last_heartbeat = now`.
    fn handle_register(&mut self, client_id: ClientId, host: String, port: u16) {
        let record = LivenessRecord::new(host, port, self.clock.now());
        let address = record.address();
        let rejoined = self.clients.insert(client_id.clone(), record).is_some();

        info!(
            client_id = %client_id,
            address = %address,
            rejoined,
            total_clients = self.clients.len(),
            "Client registered"
        );

        self.queue_persist(None);

        // Publish event (ignore if no subscribers)
        let _ = self.event_publisher.send(PresenceEvent::Registered {
            client_id,
            address,
            rejoined,
        });
    }

    /// Refreshes a known client. Unknown identities are never created here.
    fn handle_heartbeat(&mut self, client_id: ClientId) -> Result<(), RegistryError> {
        let now = self.clock.now();
        match self.clients.get_mut(&client_id) {
            Some(record) => {
                record.touch(now);
                debug!(client_id = %client_id, "Heartbeat received");
                self.queue_persist(None);
                Ok(())
            }
            None => {
                debug!(client_id = %client_id, "Heartbeat from unknown identity");
                Err(RegistryError::UnknownIdentity(client_id))
            }
        }
    }

    /// Removes every record whose silence exceeds `ttl`.
    fn handle_sweep_expired(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<ClientId> {
        let mut expired: Vec<(ClientId, i64)> = self
            .clients
            .iter()
            .filter(|(_, record)| record.is_expired(now, ttl))
            .map(|(id, record)| (id.clone(), record.silent_for(now).num_seconds()))
            .collect();

        if expired.is_empty() {
            debug!("No expired clients to sweep");
            return Vec::new();
        }

        expired.sort();

        for (client_id, silent_for_secs) in &expired {
            self.clients.remove(client_id);

            // Use warn! so it shows up without RUST_LOG=debug
            warn!(
                client_id = %client_id,
                silent_for_secs,
                ttl_secs = ttl.as_secs(),
                "Client evicted after missing heartbeats"
            );

            let _ = self.event_publisher.send(PresenceEvent::Evicted {
                client_id: client_id.clone(),
                silent_for_secs: *silent_for_secs,
            });
        }

        self.queue_persist(None);

        expired.into_iter().map(|(id, _)| id).collect()
    }

    fn handle_list_identities(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn handle_list_clients(&self) -> Vec<(ClientId, LivenessRecord)> {
        let mut clients: Vec<(ClientId, LivenessRecord)> = self
            .clients
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        clients.sort_by(|a, b| a.0.cmp(&b.0));
        clients
    }

    /// Hands a full copy of the map to the persister.
    fn queue_persist(&self, ack: Option<oneshot::Sender<Result<(), SnapshotError>>>) {
        let request = PersistRequest {
            snapshot: self.clients.clone(),
            ack,
        };
        if let Err(mpsc::error::SendError(request)) = self.persist_tx.send(request) {
            warn!("Persister is gone, snapshot not written");
            if let Some(ack) = request.ack {
                let _ = ack.send(Err(SnapshotError::Unavailable(
                    "persister stopped".to_string(),
                )));
            }
        }
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of clients currently registered.
    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::ManualClock;

    struct Harness {
        actor: RegistryActor,
        clock: ManualClock,
        persisted: mpsc::UnboundedReceiver<PersistRequest>,
        events: broadcast::Receiver<PresenceEvent>,
    }

    fn create_actor() -> Harness {
        create_actor_with(MembershipMap::new())
    }

    fn create_actor_with(initial: MembershipMap) -> Harness {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (persist_tx, persisted) = mpsc::unbounded_channel();
        let (event_tx, events) = broadcast::channel(16);
        let clock = ManualClock::default();
        let actor = RegistryActor::new(
            cmd_rx,
            initial,
            Arc::new(clock.clone()),
            persist_tx,
            event_tx,
        );
        Harness {
            actor,
            clock,
            persisted,
            events,
        }
    }

    fn register(actor: &mut RegistryActor, id: &str, host: &str, port: u16) {
        let (tx, _rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Register {
            client_id: ClientId::new(id),
            host: host.to_string(),
            port,
            respond_to: tx,
        });
    }

    async fn heartbeat(actor: &mut RegistryActor, id: &str) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Heartbeat {
            client_id: ClientId::new(id),
            respond_to: tx,
        });
        rx.await.unwrap()
    }

    async fn resolve(actor: &mut RegistryActor, id: &str) -> Option<LivenessRecord> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Resolve {
            client_id: ClientId::new(id),
            respond_to: tx,
        });
        rx.await.unwrap()
    }

    async fn sweep(actor: &mut RegistryActor, now: DateTime<Utc>, ttl: Duration) -> Vec<ClientId> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::SweepExpired {
            now,
            ttl,
            respond_to: Some(tx),
        });
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_register_inserts_and_persists() {
        let mut h = create_actor();

        register(&mut h.actor, "pc@1", "10.0.0.1", 3000);

        assert_eq!(h.actor.client_count(), 1);
        let record = resolve(&mut h.actor, "pc@1").await.unwrap();
        assert_eq!(record.address(), "10.0.0.1:3000");
        assert_eq!(record.last_heartbeat, h.clock.now());

        let persisted = h.persisted.try_recv().unwrap();
        assert_eq!(persisted.snapshot.len(), 1);

        let event = h.events.try_recv().unwrap();
        assert!(matches!(event, PresenceEvent::Registered { rejoined: false, .. }));
    }

    #[tokio::test]
    async fn test_register_twice_overwrites_address() {
        let mut h = create_actor();

        register(&mut h.actor, "pc@1", "10.0.0.1", 3000);
        h.clock.advance(Duration::from_secs(5));
        register(&mut h.actor, "pc@1", "10.0.0.9", 4000);

        assert_eq!(h.actor.client_count(), 1);
        let record = resolve(&mut h.actor, "pc@1").await.unwrap();
        assert_eq!(record.host, "10.0.0.9");
        assert_eq!(record.port, 4000);
        assert_eq!(record.last_heartbeat, h.clock.now());

        let _ = h.events.try_recv();
        let event = h.events.try_recv().unwrap();
        assert!(matches!(event, PresenceEvent::Registered { rejoined: true, .. }));
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_timestamp_only() {
        let mut h = create_actor();
        register(&mut h.actor, "pc@1", "10.0.0.1", 3000);
        let _ = h.persisted.try_recv();

        h.clock.advance(Duration::from_secs(30));
        heartbeat(&mut h.actor, "pc@1").await.unwrap();

        let record = resolve(&mut h.actor, "pc@1").await.unwrap();
        assert_eq!(record.last_heartbeat, h.clock.now());
        assert_eq!(record.address(), "10.0.0.1:3000");
        assert!(h.persisted.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_identity_creates_nothing() {
        let mut h = create_actor();

        let result = heartbeat(&mut h.actor, "ghost@0").await;

        assert_eq!(result, Err(RegistryError::UnknownIdentity(ClientId::new("ghost@0"))));
        assert_eq!(h.actor.client_count(), 0);
        assert!(h.persisted.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sweep_respects_ttl_boundary() {
        let mut h = create_actor();
        let ttl = Duration::from_secs(180);

        register(&mut h.actor, "old@1", "10.0.0.1", 3000);
        h.clock.advance(Duration::from_secs(2));
        register(&mut h.actor, "young@2", "10.0.0.2", 3000);

        // old: silent 181s (> ttl), young: silent 179s (< ttl)
        let now = h.clock.now() + chrono::Duration::seconds(179);
        let evicted = sweep(&mut h.actor, now, ttl).await;

        assert_eq!(evicted, vec![ClientId::new("old@1")]);
        assert!(resolve(&mut h.actor, "old@1").await.is_none());
        assert!(resolve(&mut h.actor, "young@2").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_without_expiry_does_not_persist() {
        let mut h = create_actor();
        register(&mut h.actor, "pc@1", "10.0.0.1", 3000);
        let _ = h.persisted.try_recv();

        let evicted = sweep(&mut h.actor, h.clock.now(), Duration::from_secs(180)).await;

        assert!(evicted.is_empty());
        assert!(h.persisted.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sweep_publishes_eviction_and_persists() {
        let mut h = create_actor();
        register(&mut h.actor, "pc@1", "10.0.0.1", 3000);
        let _ = h.persisted.try_recv();
        let _ = h.events.try_recv();

        let now = h.clock.now() + chrono::Duration::seconds(500);
        sweep(&mut h.actor, now, Duration::from_secs(180)).await;

        let persisted = h.persisted.try_recv().unwrap();
        assert!(persisted.snapshot.is_empty());
        assert_eq!(
            h.events.try_recv().unwrap(),
            PresenceEvent::Evicted {
                client_id: ClientId::new("pc@1"),
                silent_for_secs: 500,
            }
        );
    }

    #[tokio::test]
    async fn test_seeded_records_are_served_and_swept() {
        let stale_at = Utc::now() - chrono::Duration::hours(1);
        let mut initial = MembershipMap::new();
        initial.insert(ClientId::new("loaded@1"), LivenessRecord::new("10.0.0.3", 3000, stale_at));
        let mut h = create_actor_with(initial);
        h.clock.set(Utc::now());

        assert!(resolve(&mut h.actor, "loaded@1").await.is_some());

        let evicted = sweep(&mut h.actor, h.clock.now(), Duration::from_secs(180)).await;
        assert_eq!(evicted, vec![ClientId::new("loaded@1")]);
    }

    #[tokio::test]
    async fn test_list_identities_is_sorted() {
        let mut h = create_actor();
        for id in ["c@3", "a@1", "b@2"] {
            register(&mut h.actor, id, "10.0.0.1", 3000);
        }

        let (tx, rx) = oneshot::channel();
        h.actor.handle_command(RegistryCommand::ListIdentities { respond_to: tx });
        let ids = rx.await.unwrap();

        assert_eq!(
            ids,
            vec![ClientId::new("a@1"), ClientId::new("b@2"), ClientId::new("c@3")]
        );

        let (tx, rx) = oneshot::channel();
        h.actor.handle_command(RegistryCommand::ListClients { respond_to: tx });
        let clients = rx.await.unwrap();
        assert_eq!(clients.len(), 3);
        assert_eq!(clients[0].0, ClientId::new("a@1"));
    }

    #[tokio::test]
    async fn test_flush_forwards_ack_to_persister() {
        let mut h = create_actor();
        register(&mut h.actor, "pc@1", "10.0.0.1", 3000);
        let _ = h.persisted.try_recv();

        let (tx, _rx) = oneshot::channel();
        h.actor.handle_command(RegistryCommand::Flush { respond_to: tx });

        let request = h.persisted.try_recv().unwrap();
        assert!(request.ack.is_some());
        assert_eq!(request.snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let mut h = create_actor();
        let (tx, _rx) = oneshot::channel();
        let flow = h.actor.handle_command(RegistryCommand::Shutdown { respond_to: tx });
        assert!(matches!(flow, Flow::Stop));
        assert!(h.persisted.try_recv().unwrap().ack.is_some());
    }

    #[tokio::test]
    async fn test_flush_without_persister_reports_error() {
        let mut h = create_actor();
        drop(h.persisted);

        let (tx, rx) = oneshot::channel();
        h.actor.handle_command(RegistryCommand::Flush { respond_to: tx });

        assert!(matches!(rx.await.unwrap(), Err(SnapshotError::Unavailable(_))));
    }
}
