//! `GET /health` — liveness probe.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::server::AppState;

/// Health check payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Seconds since startup.
    pub uptime_secs: u64,
}

/// Report liveness.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
