use crate::config::HubConfig;
use crate::connection::handle_connection;
use crate::error::HubError;
use crate::router::Router;
use np_ws::ConnectionConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Shared state for the hub.
#[derive(Debug)]
pub struct HubState {
    /// Routing table of registered agents.
    pub router: Router,
    /// Runtime hub configuration.
    pub config: HubConfig,
    ready: AtomicBool,
}

impl HubState {
    /// Fresh state with an empty routing table.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            router: Router::new(),
            config,
            ready: AtomicBool::new(false),
        }
    }

    /// `true` while the accept loop is running.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Flip readiness.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }
}

/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<HubState>) -> Result<(), HubError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the hub accept loop with an externally-controlled shutdown signal.
///
/// When the sender behind `shutdown_rx` fires or is dropped, the accept loop
/// stops accepting new agents and waits for in-flight connections to finish.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<HubState>,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), HubError> {
    let conn_config = ConnectionConfig {
        read_timeout: state.config.read_timeout(),
    };
    let tls = match &state.config.tls {
        Some(files) => {
            let config = np_ws::tls::server_config(&files.cert, &files.key)
                .map_err(|e| HubError::Ws(e.into()))?;
            info!(cert = %files.cert.display(), "serving wss");
            Some(config)
        }
        None => None,
    };
    state.set_ready(true);

    let handler_state = Arc::clone(&state);
    let result = np_ws::serve_with_shutdown(
        listener,
        conn_config,
        tls,
        move |conn, addr| {
            let state = Arc::clone(&handler_state);
            async move {
                if let Err(e) = handle_connection(conn, addr, state).await {
                    tracing::debug!("connection from {} closed: {}", addr, e);
                }
            }
        },
        shutdown_rx,
    )
    .await;

    state.set_ready(false);
    info!("hub shut down");
    result.map_err(HubError::Ws)
}
