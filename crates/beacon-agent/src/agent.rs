//! Registration agent.
//!
//! The agent keeps one client present in the registry: it registers with a
//! bounded number of retries, then heartbeats on a fixed period. When the
//! registry answers a heartbeat with "unknown identity" (it evicted or lost
//! this client) the agent re-registers from inside the same heartbeat loop.
//!
//! ```text
//!                 start()
//!  Unregistered ───────────▶ Registering{attempts_left} ───ok──▶ Registered
//!       ▲                          │                                 │
//!       └──────── exhausted ───────┘◀──── heartbeat: UnknownIdentity ┘
//! ```
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::ClientId;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, Result};
use crate::registry_client::RegistryApi;

// ============================================================================
// Configuration
// ============================================================================

/// Timing and retry settings for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    /// Period between heartbeats.
    pub heartbeat_interval: Duration,

    /// Retries after the first failed registration attempt.
    pub max_retries: u32,

    /// Fixed delay between registration attempts.
    pub retry_delay: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Where the agent stands with the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Not registered and not currently trying.
    Unregistered,

    /// A registration attempt is in flight.
    Registering {
        /// Attempts remaining if the current one fails
        attempts_left: u32,
    },

    /// The registry accepted the last registration or heartbeat.
    Registered,
}

// ============================================================================
// Registration Agent
// ============================================================================

/// Keeps one client registered.
///
/// Cheap to clone; clones share state and the single heartbeat loop.
///
/// # Example
///
/// ```rust,ignore
/// let agent = RegistrationAgent::new(identity, host, port, api, AgentOptions::default());
/// agent.start().await?;
/// // ...
/// agent.shutdown().await;
/// ```
#[derive(Debug, Clone)]
pub struct RegistrationAgent {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    identity: ClientId,
    host: String,
    port: u16,
    api: Arc<dyn RegistryApi>,
    options: AgentOptions,
    state: watch::Sender<AgentState>,
    /// Serializes registration so the loop and callers never interleave
    registering: Mutex<()>,
    /// The heartbeat loop, once started
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    cancel_token: CancellationToken,
}

impl RegistrationAgent {
    /// Creates an agent advertising `host:port` for `identity`.
    #[must_use]
    pub fn new(
        identity: ClientId,
        host: impl Into<String>,
        port: u16,
        api: Arc<dyn RegistryApi>,
        options: AgentOptions,
    ) -> Self {
        let (state, _) = watch::channel(AgentState::Unregistered);
        Self {
            inner: Arc::new(Inner {
                identity,
                host: host.into(),
                port,
                api,
                options,
                state,
                registering: Mutex::new(()),
                heartbeat: Mutex::new(None),
                cancel_token: CancellationToken::new(),
            }),
        }
    }

    pub fn identity(&self) -> &ClientId {
        &self.inner.identity
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.inner.state.subscribe()
    }

    fn set_state(&self, state: AgentState) {
        self.inner.state.send_replace(state);
    }

    /// Registers, then makes sure the heartbeat loop is running.
    ///
    /// Calling `start` again after a failure is the way to retry once the
    /// bounded attempts are used up. The heartbeat loop is started at most
    /// once however often this is called.
    ///
    /// # Errors
    ///
    /// - `AgentError::RegistrationExhausted` if every attempt failed
    /// - `AgentError::Rejected` if the registry refused the request outright
    /// - `AgentError::Cancelled` if the agent was shut down meanwhile
    pub async fn start(&self) -> Result<()> {
        self.attempt_register().await?;
        self.ensure_heartbeat().await;
        Ok(())
    }

    /// Tries to register, retrying with a fixed delay.
    ///
    /// Makes `1 + max_retries` attempts in total. On success the state is
    /// `Registered`; after the last failure it falls back to `Unregistered`.
    /// A 4xx rejection is returned as is after the first attempt.
    pub async fn attempt_register(&self) -> Result<()> {
        let _guard = self.inner.registering.lock().await;
        let options = &self.inner.options;
        let total = options.max_retries.saturating_add(1);

        for attempt in 1..=total {
            if self.inner.cancel_token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let attempts_left = total - attempt;
            self.set_state(AgentState::Registering { attempts_left });

            match self
                .inner
                .api
                .register(&self.inner.identity, &self.inner.host, self.inner.port)
                .await
            {
                Ok(()) => {
                    self.set_state(AgentState::Registered);
                    info!(
                        client_id = %self.inner.identity,
                        host = %self.inner.host,
                        port = self.inner.port,
                        attempt,
                        "Registered with registry"
                    );
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    self.set_state(AgentState::Unregistered);
                    error!(
                        client_id = %self.inner.identity,
                        attempt,
                        error = %e,
                        "Registry refused registration"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, attempts_left, error = %e, "Registration attempt failed");
                }
            }

            if attempts_left == 0 {
                break;
            }

            // Wait before retry, checking for cancellation
            tokio::select! {
                _ = sleep(options.retry_delay) => {}
                _ = self.inner.cancel_token.cancelled() => {
                    self.set_state(AgentState::Unregistered);
                    info!("Registration retry cancelled");
                    return Err(AgentError::Cancelled);
                }
            }
        }

        self.set_state(AgentState::Unregistered);
        error!(
            client_id = %self.inner.identity,
            attempts = total,
            "Giving up on registration"
        );
        Err(AgentError::RegistrationExhausted { attempts: total })
    }

    /// Spawns the heartbeat loop unless it is already running.
    async fn ensure_heartbeat(&self) {
        let mut slot = self.inner.heartbeat.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                debug!("Heartbeat loop already running");
                return;
            }
        }
        if self.inner.cancel_token.is_cancelled() {
            return;
        }

        let agent = self.clone();
        *slot = Some(tokio::spawn(async move { agent.heartbeat_loop().await }));
        debug!(
            interval_secs = self.inner.options.heartbeat_interval.as_secs(),
            "Heartbeat loop started"
        );
    }

    async fn heartbeat_loop(self) {
        let period = self.inner.options.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.inner.cancel_token.cancelled() => {
                    debug!("Heartbeat loop stopping: cancelled");
                    break;
                }
                _ = ticker.tick() => self.heartbeat_once().await,
            }
        }
    }

    /// One heartbeat, re-registering inline if the registry forgot us.
    async fn heartbeat_once(&self) {
        match self.inner.api.heartbeat(&self.inner.identity).await {
            Ok(()) => {
                if self.state() != AgentState::Registered {
                    info!("Registry reachable again");
                }
                self.set_state(AgentState::Registered);
                debug!(client_id = %self.inner.identity, "Heartbeat acknowledged");
            }
            Err(AgentError::UnknownIdentity(_)) => {
                warn!(
                    client_id = %self.inner.identity,
                    "Registry does not know this client, re-registering"
                );
                if let Err(e) = self.attempt_register().await {
                    // Next tick tries again
                    warn!(error = %e, "Re-registration failed");
                }
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat failed, will retry next period");
            }
        }
    }

    /// Returns true while the heartbeat loop is alive.
    pub async fn is_heartbeating(&self) -> bool {
        self.inner
            .heartbeat
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops retries and the heartbeat loop and waits for the loop to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel_token.cancel();
        let handle = self.inner.heartbeat.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Heartbeat loop ended abnormally");
            }
        }
        info!(client_id = %self.inner.identity, "Agent stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    /// Scripted registry: pops queued answers, defaults to success.
    #[derive(Debug, Default)]
    struct ScriptedRegistry {
        register_script: StdMutex<VecDeque<Result<()>>>,
        heartbeat_script: StdMutex<VecDeque<Result<()>>>,
        registers: AtomicUsize,
        heartbeats: AtomicUsize,
    }

    impl ScriptedRegistry {
        fn failing_registers(n: usize) -> Self {
            let registry = Self::default();
            for _ in 0..n {
                registry.queue_register(Err(AgentError::Transport("refused".into())));
            }
            registry
        }

        fn queue_register(&self, answer: Result<()>) {
            self.register_script.lock().unwrap().push_back(answer);
        }

        fn queue_heartbeat(&self, answer: Result<()>) {
            self.heartbeat_script.lock().unwrap().push_back(answer);
        }
    }

    #[async_trait]
    impl RegistryApi for ScriptedRegistry {
        async fn register(&self, _identity: &ClientId, _host: &str, _port: u16) -> Result<()> {
            self.registers.fetch_add(1, Ordering::SeqCst);
            self.register_script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn heartbeat(&self, _identity: &ClientId) -> Result<()> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            self.heartbeat_script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn agent_with(registry: Arc<ScriptedRegistry>, max_retries: u32) -> RegistrationAgent {
        RegistrationAgent::new(
            ClientId::new("desk@1"),
            "10.0.0.5",
            3000,
            registry,
            AgentOptions {
                heartbeat_interval: Duration::from_secs(30),
                max_retries,
                retry_delay: Duration::from_secs(2),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_succeeds_first_try() {
        let registry = Arc::new(ScriptedRegistry::default());
        let agent = agent_with(registry.clone(), 3);

        agent.attempt_register().await.unwrap();

        assert_eq!(agent.state(), AgentState::Registered);
        assert_eq!(registry.registers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_retries_with_fixed_delay() {
        let registry = Arc::new(ScriptedRegistry::failing_registers(2));
        let agent = agent_with(registry.clone(), 3);

        let started = Instant::now();
        agent.attempt_register().await.unwrap();

        assert_eq!(registry.registers.load(Ordering::SeqCst), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(4) && waited < Duration::from_secs(5));
        assert_eq!(agent.state(), AgentState::Registered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_stops_after_limit() {
        let registry = Arc::new(ScriptedRegistry::failing_registers(100));
        let agent = agent_with(registry.clone(), 3);

        let err = agent.attempt_register().await.unwrap_err();

        assert_eq!(err, AgentError::RegistrationExhausted { attempts: 4 });
        assert_eq!(registry.registers.load(Ordering::SeqCst), 4);
        assert_eq!(agent.state(), AgentState::Unregistered);

        // Nothing keeps trying in the background
        sleep(Duration::from_secs(600)).await;
        assert_eq!(registry.registers.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_request_is_not_retried() {
        let registry = Arc::new(ScriptedRegistry::default());
        for _ in 0..10 {
            registry.queue_register(Err(AgentError::Rejected {
                status: 400,
                message: "missing field: host".into(),
            }));
        }
        let agent = agent_with(registry.clone(), 3);

        let started = Instant::now();
        let err = agent.attempt_register().await.unwrap_err();

        assert!(matches!(err, AgentError::Rejected { status: 400, .. }));
        assert_eq!(registry.registers.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(agent.state(), AgentState::Unregistered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_retried() {
        let registry = Arc::new(ScriptedRegistry::default());
        registry.queue_register(Err(AgentError::Rejected {
            status: 503,
            message: "registry unavailable".into(),
        }));
        let agent = agent_with(registry.clone(), 3);

        agent.attempt_register().await.unwrap();

        assert_eq!(registry.registers.load(Ordering::SeqCst), 2);
        assert_eq!(agent.state(), AgentState::Registered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registering_state_counts_down() {
        let registry = Arc::new(ScriptedRegistry::failing_registers(1));
        let agent = agent_with(registry, 2);
        let mut states = agent.subscribe_state();

        let task = tokio::spawn({
            let agent = agent.clone();
            async move { agent.attempt_register().await }
        });

        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == AgentState::Registered {
                break;
            }
        }
        task.await.unwrap().unwrap();

        assert_eq!(seen.first(), Some(&AgentState::Registering { attempts_left: 2 }));
        assert_eq!(seen.last(), Some(&AgentState::Registered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_does_not_start_heartbeats() {
        let registry = Arc::new(ScriptedRegistry::failing_registers(100));
        let agent = agent_with(registry.clone(), 1);

        assert!(agent.start().await.is_err());
        assert!(!agent.is_heartbeating().await);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.heartbeats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_on_fixed_period() {
        let registry = Arc::new(ScriptedRegistry::default());
        let agent = agent_with(registry.clone(), 3);

        agent.start().await.unwrap();
        sleep(Duration::from_secs(95)).await;

        assert_eq!(registry.heartbeats.load(Ordering::SeqCst), 3);
        agent.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_runs_one_loop() {
        let registry = Arc::new(ScriptedRegistry::default());
        let agent = agent_with(registry.clone(), 3);

        agent.start().await.unwrap();
        agent.clone().start().await.unwrap();
        sleep(Duration::from_secs(95)).await;

        assert_eq!(registry.registers.load(Ordering::SeqCst), 2);
        assert_eq!(registry.heartbeats.load(Ordering::SeqCst), 3);
        agent.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_identity_reregisters_and_keeps_one_loop() {
        let registry = Arc::new(ScriptedRegistry::default());
        registry.queue_heartbeat(Ok(()));
        registry.queue_heartbeat(Err(AgentError::UnknownIdentity(ClientId::new("desk@1"))));
        let agent = agent_with(registry.clone(), 3);

        agent.start().await.unwrap();
        // Ticks at 30, 60 (rejected -> re-register), 90, 120, 150
        sleep(Duration::from_secs(155)).await;

        assert_eq!(registry.registers.load(Ordering::SeqCst), 2);
        assert_eq!(registry.heartbeats.load(Ordering::SeqCst), 5);
        assert_eq!(agent.state(), AgentState::Registered);
        assert!(agent.is_heartbeating().await);
        agent.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_keeps_registered() {
        let registry = Arc::new(ScriptedRegistry::default());
        registry.queue_heartbeat(Err(AgentError::Transport("timeout".into())));
        let agent = agent_with(registry.clone(), 3);

        agent.start().await.unwrap();
        sleep(Duration::from_secs(35)).await;

        assert_eq!(registry.heartbeats.load(Ordering::SeqCst), 1);
        assert_eq!(registry.registers.load(Ordering::SeqCst), 1);
        assert_eq!(agent.state(), AgentState::Registered);
        agent.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reregistration_retries_next_tick() {
        let registry = Arc::new(ScriptedRegistry::default());
        let agent = agent_with(registry.clone(), 1);
        agent.start().await.unwrap();

        // Registry forgets us and refuses the next two registrations
        registry.queue_heartbeat(Err(AgentError::UnknownIdentity(ClientId::new("desk@1"))));
        registry.queue_register(Err(AgentError::Transport("down".into())));
        registry.queue_register(Err(AgentError::Transport("down".into())));
        registry.queue_heartbeat(Err(AgentError::UnknownIdentity(ClientId::new("desk@1"))));

        sleep(Duration::from_secs(35)).await;
        assert_eq!(agent.state(), AgentState::Unregistered);
        assert!(agent.is_heartbeating().await);

        // Next tick: rejected again, re-registration now succeeds
        sleep(Duration::from_secs(30)).await;
        assert_eq!(agent.state(), AgentState::Registered);
        assert_eq!(registry.registers.load(Ordering::SeqCst), 4);
        agent.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_heartbeats() {
        let registry = Arc::new(ScriptedRegistry::default());
        let agent = agent_with(registry.clone(), 3);
        agent.start().await.unwrap();

        agent.shutdown().await;
        sleep(Duration::from_secs(300)).await;

        assert_eq!(registry.heartbeats.load(Ordering::SeqCst), 0);
        assert!(!agent.is_heartbeating().await);
        assert_eq!(agent.start().await, Err(AgentError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_retry_wait() {
        let registry = Arc::new(ScriptedRegistry::failing_registers(100));
        let agent = RegistrationAgent::new(
            ClientId::new("desk@1"),
            "10.0.0.5",
            3000,
            registry,
            AgentOptions {
                heartbeat_interval: Duration::from_secs(30),
                max_retries: 3,
                retry_delay: Duration::from_secs(3600),
            },
        );

        let task = tokio::spawn({
            let agent = agent.clone();
            async move { agent.attempt_register().await }
        });
        tokio::task::yield_now().await;
        agent.shutdown().await;

        assert_eq!(task.await.unwrap(), Err(AgentError::Cancelled));
        assert_eq!(agent.state(), AgentState::Unregistered);
    }
}
