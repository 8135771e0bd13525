use crate::server::HubState;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    agents: usize,
}

/// Installs the Prometheus recorder and serves `/metrics` and `/health`.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or binding fails.
pub async fn start_metrics_server(addr: SocketAddr, state: Arc<HubState>) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app(handle, state)).await?;
    Ok(())
}

fn app(handle: PrometheusHandle, state: Arc<HubState>) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

/// 200 with the registered agent count once the hub accepts agents, 503
/// before that.
async fn health_handler(State(state): State<Arc<HubState>>) -> (StatusCode, Json<HealthResponse>) {
    let agents = state.router.len();
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                agents,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "starting",
                agents,
            }),
        )
    }
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("np_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("np_connections_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record a registration attempt with the given status label.
    pub fn registrations_total(status: &'static str) {
        metrics::counter!("np_registrations_total", "status" => status).increment(1);
    }

    /// Increment the routed-signals counter.
    pub fn signals_routed_total() {
        metrics::counter!("np_signals_routed_total").increment(1);
    }

    /// Increment the dropped-signals counter with the given reason label.
    pub fn signals_dropped_total(reason: &'static str) {
        metrics::counter!("np_signals_dropped_total", "reason" => reason).increment(1);
    }

    /// Record bytes handed to recipient queues.
    pub fn payload_bytes_total(bytes: u64) {
        metrics::counter!("np_payload_bytes_total").increment(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;

    fn state() -> Arc<HubState> {
        Arc::new(HubState::new(HubConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            mailbox: 8,
            register_timeout: 1,
            read_timeout: 30,
            max_payload: 1024,
            tls: None,
        }))
    }

    #[tokio::test]
    async fn health_reports_starting_until_ready() {
        let state = state();
        let (status, Json(body)) = health_handler(State(Arc::clone(&state))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "starting");

        state.set_ready(true);
        let (status, Json(body)) = health_handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.agents, 0);
    }
}
