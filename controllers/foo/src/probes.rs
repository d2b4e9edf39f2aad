//! Health, leadership and metrics endpoints.
//!
//! - `GET /healthz`: 200 while the process is running
//! - `GET /readyz`: 200 once a leader has been observed, 503 before
//! - `GET /leader`: this replica's identity and the current leader
//! - `GET /metrics`: Prometheus text exposition

use crate::error::ControllerError;
use crate::leadership::LeadershipState;
use crate::metrics::Metrics;
use axum::{Json, Router, extract::State, http::StatusCode, http::header, response::IntoResponse, routing::get};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// State shared by the probe handlers.
#[derive(Debug, Clone)]
pub struct ProbeState {
    leadership: Arc<LeadershipState>,
    metrics: Arc<Metrics>,
}

impl ProbeState {
    /// Creates the handler state.
    pub fn new(leadership: Arc<LeadershipState>, metrics: Arc<Metrics>) -> Self {
        Self { leadership, metrics }
    }
}

/// Response of `GET /leader`.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct LeaderResponse {
    pub identity: String,
    pub leader: Option<String>,
    pub is_leader: bool,
}

/// Routes for the probe endpoints.
pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/leader", get(leader))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.leadership.leader() {
        Some(_) => (StatusCode::OK, "ok"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no leader observed yet"),
    }
}

async fn leader(State(state): State<ProbeState>) -> Json<LeaderResponse> {
    Json(LeaderResponse {
        identity: state.leadership.identity().to_string(),
        leader: state.leadership.leader(),
        is_leader: state.leadership.is_leader(),
    })
}

async fn metrics(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serves the probe endpoints on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, state: ProbeState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Probe(format!("failed to bind {}: {}", addr, e)))?;
    info!("Probe server listening on {}", addr);

    axum::serve(listener, router(state))
        .await
        .map_err(|e| ControllerError::Probe(e.to_string()))
}
