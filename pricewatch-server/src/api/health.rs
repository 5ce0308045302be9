//! Health Check API Handler

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::state::AppState;

/// GET /health
/// Reports 503 once the session pool has been shut down
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.pool().is_closed() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "shutting down" })),
        );
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "active_jobs": state.engine.orchestrator().active_jobs().len(),
        })),
    )
}
