use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    systems: usize,
}

/// Liveness and readiness shared between the core and the HTTP endpoint.
/// The relay is ready while at least one system socket is serving.
#[derive(Clone)]
pub struct HealthState {
    started: Instant,
    systems: Arc<AtomicUsize>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// No systems serving yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            systems: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Records how many systems are serving; zero marks the relay not ready.
    pub fn set_systems(&self, n: usize) {
        self.systems.store(n, Ordering::Relaxed);
    }

    /// Systems currently serving.
    #[must_use]
    pub fn systems(&self) -> usize {
        self.systems.load(Ordering::Relaxed)
    }

    /// Whether any system is serving.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.systems() > 0
    }
}

/// Installs the Prometheus recorder and serves `/metrics`, `/health` and
/// `/ready` until the listener fails.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or binding fails.
pub async fn start_metrics_server(addr: SocketAddr, health_state: HealthState) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("(METRICS) listening on {}", addr);
    axum::serve(listener, routes(handle, health_state)).await?;
    Ok(())
}

fn routes(handle: PrometheusHandle, state: HealthState) -> Router {
    let health = state.clone();
    Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(move || std::future::ready(health_response(&health))))
        .route("/ready", get(move || std::future::ready(ready_response(&state))))
}

fn health_response(state: &HealthState) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "up",
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

fn ready_response(state: &HealthState) -> (StatusCode, Json<ReadyResponse>) {
    let body = ReadyResponse {
        ready: state.is_ready(),
        systems: state.systems(),
    };
    let code = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

/// Table size gauges.
pub mod gauges {
    /// A repeater reached the connected state on a master.
    pub fn inc_peers_connected() {
        metrics::gauge!("dmr_peers_connected").increment(1.0);
    }

    /// A connected repeater went away.
    pub fn dec_peers_connected() {
        metrics::gauge!("dmr_peers_connected").decrement(1.0);
    }

    /// Number of bridges in the table.
    pub fn set_bridges_active(n: usize) {
        metrics::gauge!("dmr_bridges_active").set(n as f64);
    }

    /// Number of tracked call streams across all systems.
    pub fn set_streams_active(n: usize) {
        metrics::gauge!("dmr_streams_active").set(n as f64);
    }
}

/// Frame and login counters.
pub mod counters {
    /// A datagram arrived on `system`.
    pub fn frames_received_total(system: &str) {
        metrics::counter!("dmr_frames_received_total", "system" => system.to_string()).increment(1);
    }

    /// A frame was transmitted in the given dialect (`hbp` or `obp`).
    pub fn frames_forwarded_total(dialect: &'static str) {
        metrics::counter!("dmr_frames_forwarded_total", "dialect" => dialect).increment(1);
    }

    /// A frame was dropped.
    pub fn frames_dropped_total(reason: &'static str) {
        metrics::counter!("dmr_frames_dropped_total", "reason" => reason).increment(1);
    }

    /// A login step finished with `status`.
    pub fn logins_total(status: &'static str) {
        metrics::counter!("dmr_logins_total", "status" => status).increment(1);
    }
}

/// Call histograms.
pub mod histograms {
    /// Duration of a finished call in seconds.
    pub fn call_duration_seconds(value: f64) {
        metrics::histogram!("dmr_call_duration_seconds").record(value);
    }
}
