#![allow(dead_code)]

use np_common::signal::Payload;
use npagent::config::AgentConfig;
use nphub::config::{HubConfig, TlsFiles};
use nphub::HubState;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub fn hub_config(listen: SocketAddr) -> HubConfig {
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

/// Serve a hub on `listener` until the returned task is aborted.
pub fn spawn_hub(listener: TcpListener) -> (Arc<HubState>, JoinHandle<()>) {
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(HubState::new(hub_config(addr)));
    let task = tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = nphub::run(listener, state).await {
                eprintln!("hub error in test: {e}");
            }
        }
    });
    (state, task)
}

pub async fn start_hub() -> (SocketAddr, Arc<HubState>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (state, task) = spawn_hub(listener);
    (addr, state, task)
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
        let cert = dir.join(format!("npagent-{}-{}.crt", tag, std::process::id()));
        let key = dir.join(format!("npagent-{}-{}.key", tag, std::process::id()));
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

/// Serve a `wss://` hub with `cert` on a fresh port.
pub async fn start_tls_hub(cert: &TestCert) -> (SocketAddr, Arc<HubState>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = hub_config(addr);
    config.tls = Some(cert.files.clone());
    let state = Arc::new(HubState::new(config));
    let task = tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = nphub::run(listener, state).await {
                eprintln!("hub error in test: {e}");
            }
        }
    });
    (addr, state, task)
}

/// An address nothing is listening on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn agent_config(addr: SocketAddr) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.hub_url = format!("ws://127.0.0.1:{}", addr.port());
    config.reconnect.base_delay_ms = 50;
    config.reconnect.max_delay_ms = 400;
    config.dial.max_retries = 1;
    config.dial.retry_delay_ms = 10;
    config.timeouts.register_s = 2;
    config.timeouts.transmit_wait_s = 5;
    config.timeouts.start_s = 5;
    config
}

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => panic!("payload must be an object"),
    }
}

/// Poll `check` every 10ms until it holds or `limit` passes.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
