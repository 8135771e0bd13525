//! Networked agent runtime: registers with a hub over WebSocket and keeps
//! the link alive with exponential reconnect backoff.

use crate::backoff::ReconnectBackoff;
use crate::config::{parse_hub_url, AgentConfig};
use crate::handler::{NoHandler, SignalHandler};
use np_common::control::{Control, Envelope};
use np_common::signal::Payload;
use np_common::{Identity, Signal, SignalType, Synapse};
use np_ws::{ConnectOptions, Connection, ConnectionConfig, TlsError, WsError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Recent signals kept by a hub agent.
const MEMORY_CAPACITY: usize = 100;
/// Buffered inbound signals per [`HubAgent::subscribe`] receiver.
const INBOX_CAPACITY: usize = 256;

/// Where the link is in its connect/register cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection; either stopped or waiting to reconnect.
    Disconnected,
    /// Dialling the hub.
    Connecting,
    /// Connected, waiting for `registered`.
    Registering,
    /// Registered and routing signals.
    Connected,
}

/// Errors surfaced by [`HubAgent`].
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link is down and the call does not wait for it.
    #[error("not connected to hub")]
    NotConnected,
    /// A bounded wait expired.
    #[error("timed out waiting for hub")]
    Timeout,
    /// Connection-layer failure.
    #[error(transparent)]
    Ws(#[from] WsError),
    /// An outgoing message could not be encoded.
    #[error("cannot encode message: {0}")]
    Encode(String),
    /// The hub refused or garbled the registration.
    #[error("registration failed: {0}")]
    Registration(String),
    /// The configured hub URL is unusable.
    #[error("invalid hub url: {0}")]
    InvalidUrl(String),
    /// TLS settings for a `wss://` hub could not be built.
    #[error(transparent)]
    Tls(#[from] TlsError),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    identity: Identity,
    dial: ConnectOptions,
    register_timeout: Duration,
    transmit_wait: Duration,
    start_wait: Duration,
    backoff: ReconnectBackoff,
    running: watch::Sender<bool>,
    state: watch::Sender<LinkState>,
    conn: Mutex<Option<Arc<Connection>>>,
    peers: Mutex<HashMap<String, String>>,
    synapses: Mutex<HashMap<String, Synapse>>,
    memory: Mutex<VecDeque<Signal>>,
    attempts: AtomicU32,
    inbox: broadcast::Sender<Signal>,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    fn current_conn(&self) -> Option<Arc<Connection>> {
        lock(&self.conn).clone()
    }

    fn remember(&self, signal: Signal) {
        let mut memory = lock(&self.memory);
        if memory.len() == MEMORY_CAPACITY {
            memory.pop_front();
        }
        memory.push_back(signal);
    }

    fn handle_control(&self, ctrl: Control) {
        match ctrl {
            Control::PeerJoined {
                agent_id,
                neural_hash,
            } => {
                info!(peer = %agent_id, hash = %neural_hash, "peer joined");
                lock(&self.peers).insert(agent_id, neural_hash);
            }
            Control::PeerLeft {
                agent_id,
                neural_hash,
            } => {
                info!(peer = %agent_id, "peer left");
                let mut peers = lock(&self.peers);
                let same_instance = match (&neural_hash, peers.get(&agent_id)) {
                    (Some(left), Some(known)) => left == known,
                    _ => true,
                };
                if same_instance {
                    peers.remove(&agent_id);
                }
            }
            Control::Registered { peers } => {
                *lock(&self.peers) = peers;
            }
            Control::Pong => debug!("pong"),
            Control::Error { reason } => warn!(%reason, "hub reported an error"),
            other => debug!(kind = other.kind(), "ignoring control message"),
        }
    }
}

/// An agent whose signals travel through a remote hub.
///
/// Targets are logical names; the hub resolves them, balancing across
/// agents that share a name.
pub struct HubAgent {
    shared: Arc<Shared>,
    handler: Arc<dyn SignalHandler>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HubAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubAgent")
            .field("identity", &self.shared.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl HubAgent {
    /// Create an agent with a fresh identity for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidUrl`] if `config.hub_url` does not parse.
    pub fn new(name: &str, config: &AgentConfig) -> Result<Self, LinkError> {
        Self::with_identity(Identity::generate(name), config)
    }

    /// Create an agent for an existing identity.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidUrl`] if `config.hub_url` does not parse,
    /// or [`LinkError::Tls`] if a `wss://` hub's TLS settings are unusable.
    pub fn with_identity(identity: Identity, config: &AgentConfig) -> Result<Self, LinkError> {
        let url = parse_hub_url(&config.hub_url).map_err(LinkError::InvalidUrl)?;
        let tls = match (url.secure, config.tls.insecure) {
            (false, _) => None,
            (true, true) => {
                warn!("hub certificate is not verified");
                Some(np_ws::tls::insecure_client_config()?)
            }
            (true, false) => Some(np_ws::tls::client_config(config.tls.ca_file.as_deref())?),
        };
        let dial = ConnectOptions {
            host: url.host,
            port: url.port,
            path: url.path,
            max_retries: config.dial.max_retries,
            base_delay: Duration::from_millis(config.dial.retry_delay_ms),
            connection: ConnectionConfig {
                read_timeout: Duration::from_secs(config.timeouts.read_s),
            },
            tls,
        };
        let (running, _) = watch::channel(false);
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (inbox, _) = broadcast::channel(INBOX_CAPACITY);

        Ok(Self {
            shared: Arc::new(Shared {
                identity,
                dial,
                register_timeout: Duration::from_secs(config.timeouts.register_s),
                transmit_wait: Duration::from_secs(config.timeouts.transmit_wait_s),
                start_wait: Duration::from_secs(config.timeouts.start_s),
                backoff: ReconnectBackoff::new(
                    config.base_delay(),
                    config.max_delay(),
                    config.reconnect.factor,
                ),
                running,
                state,
                conn: Mutex::new(None),
                peers: Mutex::new(HashMap::new()),
                synapses: Mutex::new(HashMap::new()),
                memory: Mutex::new(VecDeque::with_capacity(MEMORY_CAPACITY)),
                attempts: AtomicU32::new(0),
                inbox,
            }),
            handler: Arc::new(NoHandler),
            task: Mutex::new(None),
        })
    }

    /// Replace the signal handler. Takes effect on the next [`start`](Self::start).
    #[must_use]
    pub fn with_handler(mut self, handler: impl SignalHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// This agent's identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// Start the connection loop and wait for the first registration.
    ///
    /// The loop keeps retrying in the background even if this returns an
    /// error; call [`stop`](Self::stop) to end it.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Timeout`] if the agent is not registered within
    /// the start timeout.
    pub async fn start(&self) -> Result<(), LinkError> {
        if self.shared.running.send_replace(true) {
            return self.wait_connected(self.shared.start_wait).await;
        }
        let task = tokio::spawn(connection_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.handler),
        ));
        *lock(&self.task) = Some(task);
        info!(agent = %self.shared.identity, "agent starting");
        self.wait_connected(self.shared.start_wait).await
    }

    /// Stop reconnecting, close the link and wait for the loop to exit.
    pub async fn stop(&self) {
        self.shared.running.send_replace(false);
        if let Some(conn) = self.shared.current_conn() {
            conn.close().await;
        }
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "connection loop ended abnormally");
            }
        }
        info!(agent = %self.shared.identity, "agent stopped");
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    /// Wait up to `limit` for the link to be registered.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Timeout`] if the link is not up in time, or
    /// [`LinkError::NotConnected`] if the agent is stopped.
    pub async fn wait_connected(&self, limit: Duration) -> Result<(), LinkError> {
        let mut state = self.shared.state.subscribe();
        let mut running = self.shared.running.subscribe();
        if !*running.borrow_and_update() {
            return Err(LinkError::NotConnected);
        }
        let connected = async {
            state
                .wait_for(|s| *s == LinkState::Connected)
                .await
                .map(|_| ())
        };
        tokio::select! {
            result = timeout(limit, connected) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(LinkError::NotConnected),
                Err(_) => Err(LinkError::Timeout),
            },
            () = stopped(&mut running) => Err(LinkError::NotConnected),
        }
    }

    /// Send a signal to the agent(s) registered as `name`. The hub picks the
    /// recipient.
    ///
    /// Waits up to the transmit timeout for the link if it is down. Returns
    /// `Ok(false)` if the write fails; the reconnect loop takes over from
    /// there. The synapse towards `name` is updated either way.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Timeout`] or [`LinkError::NotConnected`] if the
    /// link does not come up, or [`LinkError::Encode`] if the signal cannot
    /// be encoded.
    pub async fn transmit(
        &self,
        name: &str,
        signal_type: SignalType,
        payload: Payload,
    ) -> Result<bool, LinkError> {
        if self.state() != LinkState::Connected {
            debug!(target = %name, "link down, waiting before transmit");
            self.wait_connected(self.shared.transmit_wait).await?;
        }
        let conn = self.shared.current_conn().ok_or(LinkError::NotConnected)?;

        let hash = &self.shared.identity.neural_hash;
        let signal = Signal::new(signal_type, hash, name, payload);
        let bytes = signal
            .encode()
            .map_err(|e| LinkError::Encode(e.to_string()))?;
        let result = conn.send(&bytes).await;
        debug!(%signal, "transmitted");
        self.shared.remember(signal);

        let mut synapses = lock(&self.shared.synapses);
        let synapse = synapses
            .entry(name.to_string())
            .or_insert_with(|| Synapse::new(hash.clone(), name));
        match result {
            Ok(()) => {
                synapse.reinforce();
                Ok(true)
            }
            Err(e) => {
                synapse.weaken();
                warn!(target = %name, error = %e, "transmit failed");
                Ok(false)
            }
        }
    }

    /// Send a signal to every other agent on the hub.
    ///
    /// Returns `Ok(false)` without waiting if the link is down or the write
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Encode`] if the signal cannot be encoded.
    pub async fn broadcast(
        &self,
        signal_type: SignalType,
        payload: Payload,
    ) -> Result<bool, LinkError> {
        if self.state() != LinkState::Connected {
            return Ok(false);
        }
        let Some(conn) = self.shared.current_conn() else {
            return Ok(false);
        };
        let signal = Signal::new(signal_type, &self.shared.identity.neural_hash, "", payload);
        let bytes = signal
            .encode()
            .map_err(|e| LinkError::Encode(e.to_string()))?;
        match conn.send(&bytes).await {
            Ok(()) => {
                self.shared.remember(signal);
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "broadcast failed");
                Ok(false)
            }
        }
    }

    /// Send a control-level `ping`; the hub answers with `pong`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotConnected`] if the link is down.
    pub async fn ping(&self) -> Result<(), LinkError> {
        let conn = self.shared.current_conn().ok_or(LinkError::NotConnected)?;
        let bytes = Control::Ping
            .encode()
            .map_err(|e| LinkError::Encode(e.to_string()))?;
        conn.send(&bytes).await?;
        Ok(())
    }

    /// Hash of the peer known as `name`, from the local directory.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<String> {
        lock(&self.shared.peers).get(name).cloned()
    }

    /// Snapshot of the peer directory (name → hash).
    #[must_use]
    pub fn peers(&self) -> HashMap<String, String> {
        lock(&self.shared.peers).clone()
    }

    /// Receiver for every signal delivered to this agent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.shared.inbox.subscribe()
    }

    /// Failed connect attempts since the last successful registration.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Snapshot of the synapse towards `name`.
    #[must_use]
    pub fn synapse(&self, name: &str) -> Option<Synapse> {
        lock(&self.shared.synapses).get(name).cloned()
    }

    /// Recent signals, oldest first.
    #[must_use]
    pub fn memory(&self) -> Vec<Signal> {
        lock(&self.shared.memory).iter().cloned().collect()
    }

    /// One line per synapse.
    #[must_use]
    pub fn synapse_report(&self) -> String {
        let synapses = lock(&self.shared.synapses);
        if synapses.is_empty() {
            return format!("{}\n  (no synapses)", self.shared.identity);
        }
        let mut lines: Vec<&Synapse> = synapses.values().collect();
        lines.sort_by(|a, b| b.strength().total_cmp(&a.strength()));
        let mut report = self.shared.identity.to_string();
        for synapse in lines {
            report.push_str("\n  ");
            report.push_str(&synapse.to_string());
        }
        report
    }
}

impl Drop for HubAgent {
    fn drop(&mut self) {
        self.shared.running.send_replace(false);
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

async fn stopped(running: &mut watch::Receiver<bool>) {
    let _ = running.wait_for(|running| !*running).await;
}

async fn connection_loop(shared: Arc<Shared>, handler: Arc<dyn SignalHandler>) {
    let mut backoff = shared.backoff.clone();
    let mut running = shared.running.subscribe();

    loop {
        if !*running.borrow_and_update() {
            break;
        }

        let attempt = tokio::select! {
            () = stopped(&mut running) => break,
            result = connect_and_register(&shared) => result,
        };

        match attempt {
            Ok(conn) => {
                backoff.reset();
                shared.attempts.store(0, Ordering::Relaxed);
                shared.set_state(LinkState::Connected);

                let result = receive_loop(&shared, &conn, handler.as_ref()).await;
                *lock(&shared.conn) = None;
                shared.set_state(LinkState::Disconnected);
                conn.close().await;
                match result {
                    Ok(()) if !shared.is_running() => break,
                    Ok(()) => warn!("hub closed the connection"),
                    Err(e) => warn!(error = %e, "hub link lost"),
                }
            }
            Err(e) => {
                shared.set_state(LinkState::Disconnected);
                warn!(
                    error = %e,
                    attempt = backoff.attempt() + 1,
                    "connect attempt failed"
                );
            }
        }

        if !shared.is_running() {
            break;
        }
        let delay = backoff.next_delay();
        shared.attempts.store(backoff.attempt(), Ordering::Relaxed);
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = stopped(&mut running) => break,
        }
    }

    shared.set_state(LinkState::Disconnected);
    debug!("connection loop exited");
}

async fn connect_and_register(shared: &Shared) -> Result<Arc<Connection>, LinkError> {
    shared.set_state(LinkState::Connecting);
    info!(
        host = %shared.dial.host,
        port = shared.dial.port,
        "connecting to hub"
    );
    let conn = Arc::new(np_ws::connect(&shared.dial).await?);

    shared.set_state(LinkState::Registering);
    let register = Control::Register {
        agent_id: shared.identity.agent_id.clone(),
        neural_hash: shared.identity.neural_hash.clone(),
    }
    .encode()
    .map_err(|e| LinkError::Encode(e.to_string()))?;

    let registered = async {
        conn.send(&register).await?;
        await_registered(&conn).await
    };
    let peers = match timeout(shared.register_timeout, registered).await {
        Ok(Ok(peers)) => peers,
        Ok(Err(e)) => {
            conn.close().await;
            return Err(e);
        }
        Err(_) => {
            conn.close().await;
            return Err(LinkError::Timeout);
        }
    };

    info!(
        agent = %shared.identity,
        peers = ?peers.keys().collect::<Vec<_>>(),
        "registered with hub"
    );
    *lock(&shared.peers) = peers;
    *lock(&shared.conn) = Some(Arc::clone(&conn));
    if !shared.is_running() {
        // stop() ran while we were registering and saw no connection to close
        conn.close().await;
    }
    Ok(conn)
}

async fn await_registered(conn: &Connection) -> Result<HashMap<String, String>, LinkError> {
    loop {
        let Some(data) = conn.recv().await? else {
            return Err(LinkError::Ws(WsError::ConnectionClosed));
        };
        match Envelope::decode(&data) {
            Ok(Envelope::Control(Control::Registered { peers })) => return Ok(peers),
            Ok(Envelope::Control(Control::Error { reason })) => {
                return Err(LinkError::Registration(reason));
            }
            Ok(other) => debug!(?other, "ignoring message before registration"),
            Err(e) => {
                return Err(LinkError::Registration(format!(
                    "unexpected reply to register: {e}"
                )));
            }
        }
    }
}

async fn receive_loop(
    shared: &Shared,
    conn: &Connection,
    handler: &dyn SignalHandler,
) -> Result<(), LinkError> {
    loop {
        let Some(data) = conn.recv().await? else {
            return Ok(());
        };
        match Envelope::decode(&data) {
            Ok(Envelope::Control(ctrl)) => shared.handle_control(ctrl),
            Ok(Envelope::Signal(signal)) => {
                debug!(%signal, "signal received");
                shared.remember(signal.clone());
                let _ = shared.inbox.send(signal.clone());
                if let Err(e) = handler.handle(&signal).await {
                    warn!(kind = %signal.signal_type, error = %e, "signal handler failed");
                }
            }
            Err(e) => warn!(error = %e, "dropping undecodable message"),
        }
    }
}
