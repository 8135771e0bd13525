#![allow(dead_code)]

use np_common::control::{Control, Envelope};
use np_common::{Identity, Signal, SignalType};
use np_ws::{connect, ConnectOptions, Connection};
use nphub::config::{HubConfig, TlsFiles};
use nphub::HubState;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub fn test_config(listen: SocketAddr) -> HubConfig {
    HubConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        mailbox: 64,
        register_timeout: 5,
        read_timeout: 30,
        max_payload: 1_048_576,
        tls: None,
    }
}

pub async fn start_hub_with(config: impl FnOnce(&mut HubConfig)) -> (SocketAddr, Arc<HubState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut cfg = test_config(addr);
    config(&mut cfg);
    let state = Arc::new(HubState::new(cfg));

    let state_clone = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = nphub::run(listener, state_clone).await {
            eprintln!("hub error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, state)
}

pub async fn start_hub() -> (SocketAddr, Arc<HubState>) {
    start_hub_with(|_| {}).await
}

/// Self-signed `localhost` certificate written to temp files, removed on drop.
pub struct TestCert {
    pub files: TlsFiles,
}

impl TestCert {
    pub fn generate(tag: &str) -> Self {
        let certified =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = std::env::temp_dir();
        let cert = dir.join(format!("nphub-{}-{}.crt", tag, std::process::id()));
        let key = dir.join(format!("nphub-{}-{}.key", tag, std::process::id()));
        std::fs::write(&cert, certified.cert.pem()).unwrap();
        std::fs::write(&key, certified.key_pair.serialize_pem()).unwrap();
        Self {
            files: TlsFiles { cert, key },
        }
    }
}

impl Drop for TestCert {
    fn drop(&mut self) {
        std::fs::remove_file(&self.files.cert).ok();
        std::fs::remove_file(&self.files.key).ok();
    }
}

pub async fn dial(addr: &SocketAddr) -> Connection {
    let mut opts = ConnectOptions::new("127.0.0.1", addr.port());
    opts.max_retries = 1;
    connect(&opts).await.unwrap()
}

pub struct TestAgent {
    pub conn: Connection,
    pub identity: Identity,
    pub peers: HashMap<String, String>,
}

impl TestAgent {
    pub async fn register(addr: &SocketAddr, name: &str) -> Self {
        Self::register_as(addr, Identity::generate(name)).await
    }

    pub async fn register_as(addr: &SocketAddr, identity: Identity) -> Self {
        let conn = dial(addr).await;
        let register = Control::Register {
            agent_id: identity.agent_id.clone(),
            neural_hash: identity.neural_hash.clone(),
        };
        conn.send(&register.encode().unwrap()).await.unwrap();

        let mut agent = Self {
            conn,
            identity,
            peers: HashMap::new(),
        };
        match agent.recv().await {
            Envelope::Control(Control::Registered { peers }) => agent.peers = peers,
            other => panic!("expected registered, got {other:?}"),
        }
        agent
    }

    pub fn hash(&self) -> &str {
        &self.identity.neural_hash
    }

    pub async fn send_signal(&self, target: &str, payload: Value) {
        let payload: Map<String, Value> = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let signal = Signal::new(
            SignalType::ActionPotential,
            self.identity.neural_hash.clone(),
            target,
            payload,
        );
        self.conn.send(&signal.encode().unwrap()).await.unwrap();
    }

    pub async fn send_control(&self, msg: &Control) {
        self.conn.send(&msg.encode().unwrap()).await.unwrap();
    }

    pub async fn recv(&self) -> Envelope {
        self.recv_timeout(Duration::from_secs(5))
            .await
            .expect("timeout waiting for message")
    }

    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        let data = tokio::time::timeout(timeout, self.conn.recv()).await.ok()?;
        let data = data.unwrap().expect("connection closed");
        Some(Envelope::decode(&data).unwrap())
    }

    /// Next data signal, skipping presence notifications.
    pub async fn recv_signal(&self) -> Signal {
        loop {
            match self.recv().await {
                Envelope::Signal(signal) => return signal,
                Envelope::Control(_) => continue,
            }
        }
    }

    /// Wait until nothing but presence notices arrive for `quiet`.
    pub async fn expect_no_signal(&self, quiet: Duration) {
        while let Some(envelope) = self.recv_timeout(quiet).await {
            if let Envelope::Signal(signal) = envelope {
                panic!("unexpected signal {signal}");
            }
        }
    }
}
