//! HTTP endpoints.
//!
//! - `GET /metrics` - Prometheus text exposition
//! - `GET /api/health` - service and session health as JSON

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::metrics::render_session;
use crate::state::AppState;

/// Content type of the Prometheus text format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Create the router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/metrics", get(prometheus_metrics))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` while the session is not failed, `degraded` otherwise.
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub uptime_secs: i64,
    /// Session lifecycle state (`streaming`, `failed`, ...).
    pub session_state: &'static str,
    /// Failure reason when `session_state` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_error: Option<String>,
    /// Energy samples recorded since start.
    pub samples: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let session = state.session_state();
    let session_error = match &session {
        emerald_core::SessionState::Failed(reason) => Some(reason.clone()),
        _ => None,
    };

    Json(HealthResponse {
        status: if session_error.is_some() { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        uptime_secs: state.uptime_secs(),
        session_state: session.as_str(),
        session_error,
        samples: state.metrics.samples(),
    })
}

async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut output = String::with_capacity(2048);
    state.metrics.render_into(&mut output);
    render_session(&mut output, &state.session_state(), &state.stats.snapshot());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        output,
    )
}
