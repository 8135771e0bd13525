//! In-process agent runtime over any [`Transport`].

use crate::handler::{NoHandler, SignalHandler};
use crate::local::LocalTransport;
use crate::transport::{Transport, TransportError};
use np_common::signal::Payload;
use np_common::{Identity, Signal, SignalType, Synapse};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;

/// Recent signals kept by an agent.
pub const MEMORY_CAPACITY: usize = 100;

/// Cooperative cancellation for [`Agent::run`].
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    /// Ask the run loop to exit after the signal it is handling, if any.
    pub fn stop(&self) {
        self.0.send_replace(true);
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// A named agent with adaptive synapses towards the peers it talks to.
pub struct Agent<T: Transport + ?Sized = LocalTransport> {
    identity: Identity,
    transport: Arc<T>,
    synapses: HashMap<String, Synapse>,
    handler: Arc<dyn SignalHandler>,
    memory: VecDeque<Signal>,
    stop: StopHandle,
}

impl<T: Transport + ?Sized> std::fmt::Debug for Agent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("identity", &self.identity)
            .field("synapses", &self.synapses.len())
            .field("memory", &self.memory.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport + ?Sized> Agent<T> {
    /// Create an agent with a fresh identity for `name`.
    #[must_use]
    pub fn new(name: &str, transport: Arc<T>) -> Self {
        Self::with_identity(Identity::generate(name), transport)
    }

    /// Create an agent for an existing identity.
    #[must_use]
    pub fn with_identity(identity: Identity, transport: Arc<T>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            identity,
            transport,
            synapses: HashMap::new(),
            handler: Arc::new(NoHandler),
            memory: VecDeque::with_capacity(MEMORY_CAPACITY),
            stop: StopHandle(Arc::new(tx)),
        }
    }

    /// Replace the signal handler.
    #[must_use]
    pub fn with_handler(mut self, handler: impl SignalHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// This agent's identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Register this agent's mailbox with the transport.
    pub async fn start(&self) {
        self.transport
            .register_agent(&self.identity.agent_id, &self.identity.neural_hash)
            .await;
        tracing::info!(agent = %self.identity, "agent started");
    }

    /// Unregister from the transport and stop the run loop.
    pub async fn shutdown(&self) {
        self.stop.stop();
        self.transport
            .unregister_agent(&self.identity.neural_hash)
            .await;
        tracing::info!(agent = %self.identity, "agent stopped");
    }

    /// Handle that stops [`run`](Self::run) from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Open (or reuse) the synapse towards the agent registered as `name`.
    ///
    /// Returns `None` if the transport cannot resolve the name.
    pub fn connect(&mut self, name: &str) -> Option<&Synapse> {
        let target = self.transport.resolve(name)?;
        let source = &self.identity.neural_hash;
        Some(
            self.synapses
                .entry(target.clone())
                .or_insert_with(|| Synapse::new(source.clone(), target)),
        )
    }

    /// Drop the synapse towards `neural_hash`.
    pub fn disconnect(&mut self, neural_hash: &str) -> Option<Synapse> {
        self.synapses.remove(neural_hash)
    }

    /// Synapse towards `neural_hash`, if one exists.
    #[must_use]
    pub fn synapse(&self, neural_hash: &str) -> Option<&Synapse> {
        self.synapses.get(neural_hash)
    }

    /// Send a signal to the agent registered as `name`.
    ///
    /// Returns `Ok(false)` if the name does not resolve or nobody accepted
    /// the signal. The synapse towards the target is reinforced on delivery
    /// and weakened otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] if the signal cannot be encoded.
    pub async fn transmit(
        &mut self,
        name: &str,
        signal_type: SignalType,
        payload: Payload,
    ) -> Result<bool, TransportError> {
        let Some(target) = self.transport.resolve(name) else {
            tracing::warn!(agent = %self.identity, target = %name, "unknown target");
            return Ok(false);
        };
        let signal = Signal::new(signal_type, &self.identity.neural_hash, &target, payload);
        let result = self.transport.send(&signal).await;
        self.remember(signal);

        let source = &self.identity.neural_hash;
        let synapse = self
            .synapses
            .entry(target.clone())
            .or_insert_with(|| Synapse::new(source.clone(), target));
        match result {
            Ok(true) => {
                synapse.reinforce();
                Ok(true)
            }
            Ok(false) => {
                synapse.weaken();
                Ok(false)
            }
            Err(e) => {
                synapse.weaken();
                Err(e)
            }
        }
    }

    /// Send a signal to every other registered agent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] if the signal cannot be encoded.
    pub async fn broadcast(
        &mut self,
        signal_type: SignalType,
        payload: Payload,
    ) -> Result<bool, TransportError> {
        let signal = Signal::new(signal_type, &self.identity.neural_hash, "", payload);
        let delivered = self.transport.send(&signal).await?;
        self.remember(signal);
        Ok(delivered)
    }

    /// Dispatch one signal to the handler. Handler errors are logged.
    pub async fn handle_signal(&self, signal: &Signal) {
        if let Err(e) = self.handler.handle(signal).await {
            tracing::warn!(
                agent = %self.identity,
                kind = %signal.signal_type,
                error = %e,
                "signal handler failed"
            );
        }
    }

    /// Receive and handle signals until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotRegistered`] if the mailbox disappears
    /// while the agent is still running.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        let mut stop_rx = self.stop.0.subscribe();
        let transport = Arc::clone(&self.transport);
        let hash = self.identity.neural_hash.clone();
        tracing::info!(agent = %self.identity, "listening");

        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }
            let next = tokio::select! {
                _ = stop_rx.changed() => None,
                result = transport.receive(&hash) => Some(result),
            };
            match next {
                None => continue,
                Some(Ok(signal)) => {
                    tracing::debug!(agent = %self.identity, %signal, "signal received");
                    self.remember(signal.clone());
                    self.handle_signal(&signal).await;
                }
                Some(Err(TransportError::NotRegistered(_))) if self.stop.is_stopped() => break,
                Some(Err(e @ TransportError::NotRegistered(_))) => return Err(e),
                Some(Err(e)) => {
                    tracing::warn!(agent = %self.identity, error = %e, "dropping undecodable signal");
                }
            }
        }

        tracing::info!(agent = %self.identity, "run loop stopped");
        Ok(())
    }

    /// Recent signals, oldest first.
    pub fn memory(&self) -> impl Iterator<Item = &Signal> {
        self.memory.iter()
    }

    /// One line per synapse.
    #[must_use]
    pub fn synapse_report(&self) -> String {
        if self.synapses.is_empty() {
            return format!("{}\n  (no synapses)", self.identity);
        }
        let mut synapses: Vec<&Synapse> = self.synapses.values().collect();
        synapses.sort_by(|a, b| b.strength().total_cmp(&a.strength()));
        let mut report = self.identity.to_string();
        for synapse in synapses {
            report.push_str("\n  ");
            report.push_str(&synapse.to_string());
        }
        report
    }

    fn remember(&mut self, signal: Signal) {
        if self.memory.len() == MEMORY_CAPACITY {
            self.memory.pop_front();
        }
        self.memory.push_back(signal);
    }
}
