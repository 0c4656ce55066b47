// crates/server/src/routes/status.rs
//! Liveness and scrape endpoints, both reporting the coordination state.
//!
//! - GET /health - Registry and bus occupancy
//! - GET /metrics - Prometheus text, with job gauges refreshed per scrape

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::metrics::{record_running_jobs, render_metrics};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Running jobs per operation. Drained operations report zero.
    pub jobs: BTreeMap<String, usize>,
    pub online_users: usize,
    pub clients: usize,
}

impl HealthResponse {
    fn collect(state: &AppState) -> Self {
        let bus = state.context.bus();
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.uptime_secs(),
            jobs: state.context.registry().counts(),
            online_users: bus.online_users().len(),
            clients: bus.total_clients(),
        }
    }
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse::collect(&state))
}

/// GET /metrics - 503 until the recorder is installed.
async fn scrape(State(state): State<Arc<AppState>>) -> Response {
    record_running_jobs(&state.context.registry().counts());
    let Some(body) = render_metrics() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response();
    };
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Health under the API prefix.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// Scrape endpoint, mounted at the root where Prometheus looks for it.
pub fn scrape_router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(scrape))
}
