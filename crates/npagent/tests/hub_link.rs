mod common;

use common::*;
use np_common::SignalType;
use npagent::{Handlers, HubAgent, LinkError, LinkState};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[tokio::test]
async fn signal_reaches_named_agent_through_hub() {
    let (addr, _state, _hub) = start_hub().await;
    let config = agent_config(addr);

    let soporte = HubAgent::new("soporte", &config).unwrap();
    let ventas = HubAgent::new("ventas", &config).unwrap();
    soporte.start().await.unwrap();
    ventas.start().await.unwrap();
    let mut inbox = ventas.subscribe();

    let sent = soporte
        .transmit(
            "ventas",
            SignalType::ActionPotential,
            payload(json!({"issue": "slow"})),
        )
        .await
        .unwrap();
    assert!(sent);

    let signal = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.signal_type, SignalType::ActionPotential);
    assert_eq!(signal.source, soporte.identity().neural_hash);
    assert_eq!(signal.target, "ventas");
    assert_eq!(signal.payload["issue"], "slow");

    let synapse = soporte.synapse("ventas").unwrap();
    assert_eq!(synapse.success_count(), 1);
    assert!(synapse.strength() > 1.0);
    assert_eq!(ventas.memory().len(), 1);

    soporte.stop().await;
    ventas.stop().await;
}

#[tokio::test]
async fn peer_directory_follows_presence() {
    let (addr, _state, _hub) = start_hub().await;
    let config = agent_config(addr);

    let soporte = HubAgent::new("soporte", &config).unwrap();
    soporte.start().await.unwrap();
    assert!(soporte.peers().is_empty());

    let ventas = HubAgent::new("ventas", &config).unwrap();
    ventas.start().await.unwrap();
    assert_eq!(
        ventas.resolve("soporte").as_deref(),
        Some(soporte.identity().neural_hash.as_str())
    );

    let ventas_hash = ventas.identity().neural_hash.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            let known = soporte.resolve("ventas");
            let expected = ventas_hash.clone();
            async move { known.as_deref() == Some(expected.as_str()) }
        })
        .await
    );

    ventas.stop().await;
    assert!(
        eventually(Duration::from_secs(5), || {
            let gone = soporte.resolve("ventas").is_none();
            async move { gone }
        })
        .await
    );
    soporte.stop().await;
}

#[tokio::test]
async fn broadcast_skips_sender() {
    let (addr, _state, _hub) = start_hub().await;
    let config = agent_config(addr);

    let a = HubAgent::new("a", &config).unwrap();
    let b = HubAgent::new("b", &config).unwrap();
    let c = HubAgent::new("c", &config).unwrap();
    for agent in [&a, &b, &c] {
        agent.start().await.unwrap();
    }
    let mut a_inbox = a.subscribe();
    let mut b_inbox = b.subscribe();
    let mut c_inbox = c.subscribe();

    assert!(a
        .broadcast(SignalType::Serotonin, payload(json!({"calm": true})))
        .await
        .unwrap());

    for inbox in [&mut b_inbox, &mut c_inbox] {
        let signal = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_broadcast());
        assert_eq!(signal.payload["calm"], true);
    }
    let nothing = tokio::time::timeout(Duration::from_millis(200), a_inbox.recv()).await;
    assert!(nothing.is_err());

    for agent in [&a, &b, &c] {
        agent.stop().await;
    }
}

#[tokio::test]
async fn handlers_see_hub_signals() {
    let (addr, _state, _hub) = start_hub().await;
    let config = agent_config(addr);

    let (tx, mut rx) = mpsc::channel(8);
    let handlers = Handlers::new().on_signal(SignalType::Dopamine, move |signal| {
        let tx = tx.clone();
        async move {
            tx.send(signal.payload).await?;
            Ok(())
        }
    });

    let billing = HubAgent::new("billing", &config)
        .unwrap()
        .with_handler(handlers);
    let soporte = HubAgent::new("soporte", &config).unwrap();
    billing.start().await.unwrap();
    soporte.start().await.unwrap();

    soporte
        .transmit("billing", SignalType::Gaba, payload(json!({"skip": true})))
        .await
        .unwrap();
    soporte
        .transmit("billing", SignalType::Dopamine, payload(json!({"paid": 42})))
        .await
        .unwrap();

    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got["paid"], 42);

    billing.stop().await;
    soporte.stop().await;
}

#[tokio::test]
async fn ping_round_trips() {
    let (addr, _state, _hub) = start_hub().await;
    let agent = HubAgent::new("solo", &agent_config(addr)).unwrap();
    agent.start().await.unwrap();
    agent.ping().await.unwrap();
    // pong is absorbed; the link stays up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.state(), LinkState::Connected);
    agent.stop().await;
}

#[tokio::test]
async fn start_times_out_without_hub_and_keeps_retrying() {
    let addr = dead_addr().await;
    let mut config = agent_config(addr);
    config.timeouts.start_s = 1;

    let agent = HubAgent::new("lonely", &config).unwrap();
    let err = agent.start().await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout));
    assert!(agent.reconnect_attempts() >= 1);
    assert_ne!(agent.state(), LinkState::Connected);

    tokio::time::timeout(Duration::from_secs(2), agent.stop())
        .await
        .expect("stop should interrupt the backoff sleep");
    assert_eq!(agent.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn reconnects_after_hub_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_state, hub) = spawn_hub(listener);
    let config = agent_config(addr);

    let agent = HubAgent::new("ventas", &config).unwrap();
    agent.start().await.unwrap();
    assert_eq!(agent.reconnect_attempts(), 0);

    hub.abort();
    let _ = hub.await;
    assert!(
        eventually(Duration::from_secs(5), || {
            let down = agent.state() != LinkState::Connected;
            async move { down }
        })
        .await
    );

    let listener = TcpListener::bind(addr).await.unwrap();
    let (state, _hub) = spawn_hub(listener);
    agent
        .wait_connected(Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(agent.reconnect_attempts(), 0);
    assert!(
        eventually(Duration::from_secs(2), || {
            let registered = state.router.len() == 1;
            async move { registered }
        })
        .await
    );

    let peer = HubAgent::new("soporte", &config).unwrap();
    peer.start().await.unwrap();
    let mut inbox = agent.subscribe();
    assert!(peer
        .transmit("ventas", SignalType::Glutamate, payload(json!({"after": "restart"})))
        .await
        .unwrap());
    let signal = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.payload["after"], "restart");

    peer.stop().await;
    agent.stop().await;
}

#[tokio::test]
async fn transmit_after_stop_is_not_connected() {
    let (addr, _state, _hub) = start_hub().await;
    let agent = HubAgent::new("brief", &agent_config(addr)).unwrap();
    agent.start().await.unwrap();
    agent.stop().await;

    assert_eq!(agent.state(), LinkState::Disconnected);
    let err = agent
        .transmit("anyone", SignalType::Dopamine, payload(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::NotConnected));
    assert!(!agent
        .broadcast(SignalType::Dopamine, payload(json!({})))
        .await
        .unwrap());
}

#[tokio::test]
async fn signal_travels_over_wss() {
    let cert = TestCert::generate("wss-link");
    let (addr, _state, _hub) = start_tls_hub(&cert).await;
    let mut config = agent_config(addr);
    config.hub_url = format!("wss://localhost:{}", addr.port());
    config.tls.ca_file = Some(cert.files.cert.clone());

    let soporte = HubAgent::new("soporte", &config).unwrap();
    let ventas = HubAgent::new("ventas", &config).unwrap();
    soporte.start().await.unwrap();
    ventas.start().await.unwrap();
    let mut inbox = ventas.subscribe();

    assert!(soporte
        .transmit("ventas", SignalType::Dopamine, payload(json!({"secure": true})))
        .await
        .unwrap());
    let signal = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.payload["secure"], true);

    soporte.stop().await;
    ventas.stop().await;
}

#[tokio::test]
async fn wss_hub_with_unknown_certificate_is_refused() {
    let cert = TestCert::generate("wss-refused");
    let (addr, state, _hub) = start_tls_hub(&cert).await;
    let mut config = agent_config(addr);
    config.hub_url = format!("wss://localhost:{}", addr.port());
    config.timeouts.start_s = 1;

    let agent = HubAgent::new("intruso", &config).unwrap();
    assert!(matches!(agent.start().await, Err(LinkError::Timeout)));
    assert!(state.router.is_empty());
    agent.stop().await;

    config.tls.insecure = true;
    let agent = HubAgent::new("confiado", &config).unwrap();
    agent.start().await.unwrap();
    assert_eq!(agent.state(), LinkState::Connected);
    agent.stop().await;
}
