//! Health API endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Response for GET /api/health.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    status: &'static str,
    /// Connected live reload sessions.
    sessions: usize,
    live_reload: bool,
}

/// Handle GET /api/health.
pub(crate) async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state
            .live_reload
            .as_ref()
            .map_or(0, crate::live_reload::LiveReloadManager::session_count),
        live_reload: state.live_reload_enabled(),
    })
}
