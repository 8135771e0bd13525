use crate::error::HubError;
use crate::metrics::{counters, gauges};
use crate::router::PeerHandle;
use crate::server::HubState;
use np_common::control::{is_control, Control, Envelope};
use np_ws::Connection;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Wait for the agent's `register` message.
async fn await_register(conn: &Connection) -> Result<(String, String), HubError> {
    let Some(data) = conn.recv().await? else {
        return Err(HubError::ConnectionClosed);
    };
    if !is_control(&data) {
        return Err(HubError::Registration(
            "first message must be register".to_string(),
        ));
    }
    match Control::decode(&data).map_err(|e| HubError::Envelope(e.into()))? {
        Control::Register {
            agent_id,
            neural_hash,
        } if !agent_id.is_empty() && !neural_hash.is_empty() => Ok((agent_id, neural_hash)),
        other => Err(HubError::Registration(format!(
            "expected register, got {}",
            other.kind()
        ))),
    }
}

/// Refuse the agent with an `error` control message and close.
async fn reject(conn: &Connection, reason: &str) {
    if let Ok(bytes) = (Control::Error {
        reason: reason.to_string(),
    })
    .encode()
    {
        let _ = conn.send(&bytes).await;
    }
    conn.close().await;
}

/// Queue a control message for every agent except `exclude`.
fn notify_others(state: &HubState, exclude: &str, msg: &Control) {
    let Ok(bytes) = msg.encode() else {
        return;
    };
    for peer in state.router.others(exclude) {
        if peer.tx.try_send(bytes.clone()).is_err() {
            tracing::debug!(peer = %peer.agent_id, kind = msg.kind(), "presence notice dropped");
        }
    }
}

/// Handle one inbound payload from a registered agent.
fn process_message(data: &[u8], state: &HubState, me: &PeerHandle) {
    if data.len() > state.config.max_payload {
        counters::signals_dropped_total("oversize");
        return;
    }

    let envelope = match Envelope::decode(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            counters::signals_dropped_total("malformed");
            tracing::debug!(agent = %me.agent_id, error = %e, "undecodable message");
            return;
        }
    };

    match envelope {
        Envelope::Control(Control::Ping) => {
            if let Ok(pong) = Control::Pong.encode() {
                let _ = me.tx.try_send(pong);
            }
        }
        Envelope::Control(other) => {
            tracing::debug!(agent = %me.agent_id, kind = other.kind(), "ignoring control message");
        }
        Envelope::Signal(signal) => {
            let recipients = state.router.recipients(&me.neural_hash, &signal.target);
            if recipients.is_empty() {
                counters::signals_dropped_total("no_route");
                tracing::debug!(
                    from = %me.agent_id,
                    target = %signal.target,
                    "no route for signal"
                );
                return;
            }
            for peer in recipients {
                match peer.tx.try_send(data.to_vec()) {
                    Ok(()) => {
                        counters::signals_routed_total();
                        counters::payload_bytes_total(data.len() as u64);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        counters::signals_dropped_total("queue_full");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        counters::signals_dropped_total("offline");
                        state.router.remove_if(&peer.neural_hash, peer.admitted_at);
                    }
                }
            }
        }
    }
}

/// Serve one upgraded agent connection until it closes.
///
/// # Errors
///
/// Returns an error if registration fails or the connection breaks.
pub async fn handle_connection(
    conn: Connection,
    peer_addr: SocketAddr,
    state: Arc<HubState>,
) -> Result<(), HubError> {
    let (agent_id, neural_hash) =
        match timeout(state.config.register_timeout(), await_register(&conn)).await {
            Ok(Ok(registration)) => {
                counters::registrations_total("accepted");
                registration
            }
            Ok(Err(e)) => {
                counters::registrations_total("rejected");
                reject(&conn, &e.to_string()).await;
                return Err(e);
            }
            Err(_) => {
                counters::registrations_total("timeout");
                reject(&conn, "register timeout").await;
                return Err(HubError::Registration("register timeout".to_string()));
            }
        };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(state.config.mailbox);
    let registered = Control::Registered {
        peers: state.router.peers_except(&neural_hash),
    }
    .encode()
    .map_err(|e| HubError::Envelope(e.into()))?;
    conn.send(&registered).await?;

    let me = PeerHandle {
        agent_id: agent_id.clone(),
        neural_hash: neural_hash.clone(),
        tx,
        admitted_at: Instant::now(),
    };
    if let Some(old) = state.router.insert(me.clone()) {
        tracing::info!(agent = %old.agent_id, hash = %old.neural_hash, "replaced existing registration");
    }
    notify_others(
        &state,
        &neural_hash,
        &Control::PeerJoined {
            agent_id: agent_id.clone(),
            neural_hash: neural_hash.clone(),
        },
    );
    gauges::inc_connections_active();
    tracing::info!(agent = %agent_id, hash = %neural_hash, peer = %peer_addr, "agent registered");

    let writer = async {
        while let Some(data) = rx.recv().await {
            if let Err(e) = conn.send(&data).await {
                tracing::debug!("writer stopped: {}", e);
                break;
            }
        }
    };
    let reader = async {
        loop {
            match conn.recv().await {
                Ok(Some(data)) => process_message(&data, &state, &me),
                Ok(None) => break Ok(()),
                Err(e) => break Err(HubError::Ws(e)),
            }
        }
    };
    // both halves live in this task so dropping it releases the socket
    let result = tokio::select! {
        result = reader => result,
        () = writer => Ok(()),
    };

    if state.router.remove_if(&neural_hash, me.admitted_at) {
        notify_others(
            &state,
            &neural_hash,
            &Control::PeerLeft {
                agent_id: agent_id.clone(),
                neural_hash: Some(neural_hash.clone()),
            },
        );
    }
    gauges::dec_connections_active();
    conn.close().await;
    tracing::info!(agent = %agent_id, "agent disconnected");

    result
}
