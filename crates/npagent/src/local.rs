//! In-process delivery fabric: one bounded mailbox per registered hash.

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use dashmap::DashMap;
use np_common::Signal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Queue capacity of every mailbox.
pub const MAILBOX_CAPACITY: usize = 1000;

#[derive(Clone)]
struct Mailbox {
    tx: mpsc::Sender<Arc<[u8]>>,
    rx: Arc<Mutex<mpsc::Receiver<Arc<[u8]>>>>,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

/// Running totals reported by [`LocalTransport::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportStats {
    /// Signals accepted by `send`.
    pub transmitted: u64,
    /// Cumulative encoded bytes of those signals.
    pub bytes: u64,
    /// Registered mailboxes.
    pub agents: usize,
}

/// Mailbox registry for agents living in the same process.
pub struct LocalTransport {
    mailboxes: DashMap<String, Mailbox>,
    names: DashMap<String, String>,
    hashes: DashMap<String, String>,
    capacity: usize,
    transmitted: AtomicU64,
    bytes: AtomicU64,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::with_capacity(MAILBOX_CAPACITY)
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("agents", &self.mailboxes.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl LocalTransport {
    /// Create a registry with the default mailbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry whose mailboxes hold `capacity` messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mailboxes: DashMap::new(),
            names: DashMap::new(),
            hashes: DashMap::new(),
            capacity: capacity.max(1),
            transmitted: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Snapshot of the running counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            transmitted: self.transmitted.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            agents: self.mailboxes.len(),
        }
    }

    fn deliver(&self, hash: &str, bytes: &Arc<[u8]>) -> bool {
        let Some(tx) = self.mailboxes.get(hash).map(|m| m.tx.clone()) else {
            return false;
        };
        match tx.try_send(Arc::clone(bytes)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(target_hash = %hash, "mailbox full, signal dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn register_agent(&self, name: &str, neural_hash: &str) {
        self.mailboxes
            .insert(neural_hash.to_string(), Mailbox::new(self.capacity));
        self.names.insert(name.to_string(), neural_hash.to_string());
        self.hashes.insert(neural_hash.to_string(), name.to_string());
        tracing::debug!(agent = %name, hash = %neural_hash, "mailbox registered");
    }

    async fn unregister_agent(&self, neural_hash: &str) {
        self.mailboxes.remove(neural_hash);
        if let Some((_, name)) = self.hashes.remove(neural_hash) {
            self.names.remove_if(&name, |_, hash| hash == neural_hash);
        }
        tracing::debug!(hash = %neural_hash, "mailbox unregistered");
    }

    fn resolve(&self, name: &str) -> Option<String> {
        self.names.get(name).map(|entry| entry.value().clone())
    }

    async fn send(&self, signal: &Signal) -> Result<bool, TransportError> {
        let encoded: Arc<[u8]> = signal.encode().map_err(TransportError::Encode)?.into();

        let delivered = if signal.is_broadcast() {
            let targets: Vec<String> = self
                .mailboxes
                .iter()
                .filter(|entry| entry.key() != &signal.source)
                .map(|entry| entry.key().clone())
                .collect();
            targets
                .iter()
                .filter(|hash| self.deliver(hash, &encoded))
                .count()
        } else if signal.target == signal.source {
            0
        } else {
            usize::from(self.deliver(&signal.target, &encoded))
        };

        self.transmitted.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(encoded.len() as u64, Ordering::Relaxed);

        Ok(delivered > 0)
    }

    async fn receive(&self, neural_hash: &str) -> Result<Signal, TransportError> {
        let rx = self
            .mailboxes
            .get(neural_hash)
            .map(|m| Arc::clone(&m.rx))
            .ok_or_else(|| TransportError::NotRegistered(neural_hash.to_string()))?;

        let mut rx = rx.lock().await;
        match rx.recv().await {
            Some(bytes) => Ok(Signal::decode(&bytes)?),
            None => Err(TransportError::NotRegistered(neural_hash.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use np_common::{Identity, SignalType};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn payload(value: Value) -> np_common::signal::Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    async fn registered(transport: &LocalTransport, name: &str) -> Identity {
        let identity = Identity::generate(name);
        transport
            .register_agent(&identity.agent_id, &identity.neural_hash)
            .await;
        identity
    }

    #[tokio::test]
    async fn targeted_signal_reaches_only_target() {
        let transport = LocalTransport::new();
        let soporte = registered(&transport, "soporte").await;
        let ventas = registered(&transport, "ventas").await;

        let signal = Signal::new(
            SignalType::ActionPotential,
            &soporte.neural_hash,
            &ventas.neural_hash,
            payload(json!({"issue": "slow"})),
        );
        assert!(transport.send(&signal).await.unwrap());

        let got = transport.receive(&ventas.neural_hash).await.unwrap();
        assert_eq!(got.signal_type, SignalType::ActionPotential);
        assert_eq!(got.source, soporte.neural_hash);
        assert_eq!(got.target, ventas.neural_hash);
        assert_eq!(got.payload["issue"], "slow");

        let nothing = tokio::time::timeout(
            Duration::from_millis(50),
            transport.receive(&soporte.neural_hash),
        )
        .await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let transport = LocalTransport::new();
        let a = registered(&transport, "a").await;
        let b = registered(&transport, "b").await;
        let c = registered(&transport, "c").await;

        let signal = Signal::new(SignalType::Serotonin, &a.neural_hash, "", payload(json!({})));
        assert!(transport.send(&signal).await.unwrap());

        for id in [&b, &c] {
            let got = transport.receive(&id.neural_hash).await.unwrap();
            assert_eq!(got.source, a.neural_hash);
            assert!(got.is_broadcast());
        }
        let sender = tokio::time::timeout(
            Duration::from_millis(50),
            transport.receive(&a.neural_hash),
        )
        .await;
        assert!(sender.is_err());
    }

    #[tokio::test]
    async fn broadcast_with_no_one_else_is_not_delivered() {
        let transport = LocalTransport::new();
        let solo = registered(&transport, "solo").await;
        let signal = Signal::new(SignalType::Gaba, &solo.neural_hash, "", payload(json!({})));
        assert!(!transport.send(&signal).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_target_is_not_delivered() {
        let transport = LocalTransport::new();
        let a = registered(&transport, "a").await;
        let signal = Signal::new(SignalType::Dopamine, &a.neural_hash, "ghost", payload(json!({})));
        assert!(!transport.send(&signal).await.unwrap());
        assert_eq!(transport.stats().transmitted, 1);
    }

    #[tokio::test]
    async fn mailbox_is_fifo() {
        let transport = LocalTransport::new();
        let a = registered(&transport, "a").await;
        let b = registered(&transport, "b").await;

        for n in 0..10 {
            let signal = Signal::new(
                SignalType::Glutamate,
                &a.neural_hash,
                &b.neural_hash,
                payload(json!({ "n": n })),
            );
            transport.send(&signal).await.unwrap();
        }
        for n in 0..10 {
            let got = transport.receive(&b.neural_hash).await.unwrap();
            assert_eq!(got.payload["n"], n);
        }
    }

    #[tokio::test]
    async fn full_mailbox_drops_without_failing() {
        let transport = LocalTransport::with_capacity(2);
        let a = registered(&transport, "a").await;
        let b = registered(&transport, "b").await;
        let c = registered(&transport, "c").await;

        let to_b = |n: i32| {
            Signal::new(
                SignalType::Norepinephrine,
                &a.neural_hash,
                &b.neural_hash,
                payload(json!({ "n": n })),
            )
        };
        assert!(transport.send(&to_b(0)).await.unwrap());
        assert!(transport.send(&to_b(1)).await.unwrap());
        assert!(!transport.send(&to_b(2)).await.unwrap());

        // b is full but c still gets the broadcast
        let broadcast = Signal::new(SignalType::Gaba, &a.neural_hash, "", payload(json!({})));
        assert!(transport.send(&broadcast).await.unwrap());
        assert!(transport.receive(&c.neural_hash).await.unwrap().is_broadcast());

        assert_eq!(transport.receive(&b.neural_hash).await.unwrap().payload["n"], 0);
        assert_eq!(transport.receive(&b.neural_hash).await.unwrap().payload["n"], 1);
    }

    #[tokio::test]
    async fn receive_on_unknown_hash_fails() {
        let transport = LocalTransport::new();
        let err = transport.receive("nobody").await.unwrap_err();
        assert!(matches!(err, TransportError::NotRegistered(hash) if hash == "nobody"));
    }

    #[tokio::test]
    async fn unregister_wakes_pending_receive() {
        let transport = Arc::new(LocalTransport::new());
        let a = registered(&transport, "a").await;

        let pending = tokio::spawn({
            let transport = Arc::clone(&transport);
            let hash = a.neural_hash.clone();
            async move { transport.receive(&hash).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.unregister_agent(&a.neural_hash).await;

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::NotRegistered(_))));
        assert!(transport.resolve("a").is_none());
        assert_eq!(transport.stats().agents, 0);
    }

    #[tokio::test]
    async fn resolve_and_stats() {
        let transport = LocalTransport::new();
        let a = registered(&transport, "a").await;
        let b = registered(&transport, "b").await;
        assert_eq!(transport.resolve("b").as_deref(), Some(b.neural_hash.as_str()));
        assert!(transport.resolve("z").is_none());

        let signal = Signal::new(
            SignalType::Dopamine,
            &a.neural_hash,
            &b.neural_hash,
            payload(json!({"ok": true})),
        );
        let size = signal.size_bytes() as u64;
        transport.send(&signal).await.unwrap();

        let stats = transport.stats();
        assert_eq!(stats.transmitted, 1);
        assert_eq!(stats.bytes, size);
        assert_eq!(stats.agents, 2);
    }

    #[tokio::test]
    async fn reregistering_replaces_mailbox() {
        let transport = LocalTransport::new();
        let a = registered(&transport, "a").await;
        let b = registered(&transport, "b").await;
        let signal = Signal::new(SignalType::Dopamine, &a.neural_hash, &b.neural_hash, payload(json!({})));
        transport.send(&signal).await.unwrap();

        transport.register_agent("b", &b.neural_hash).await;
        let nothing = tokio::time::timeout(
            Duration::from_millis(50),
            transport.receive(&b.neural_hash),
        )
        .await;
        assert!(nothing.is_err());
    }
}
