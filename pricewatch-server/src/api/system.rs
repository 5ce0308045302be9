//! System API Handlers
//!
//! Memory, session pool and circuit breaker status.

use axum::{
    Json,
    extract::{Query, State},
};
use pricewatch_core::dto::system::{MemorySnapshot, MemoryUsage, SystemStatus};
use pricewatch_engine::resilience::CircuitState;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::state::AppState;

/// GET /system/status
pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(state.engine.system_status())
}

/// GET /system/memory
/// Fresh memory sample
pub async fn get_memory(State(state): State<AppState>) -> ApiResult<Json<MemoryUsage>> {
    Ok(Json(state.engine.monitor().get_current_usage()?))
}

/// GET /system/memory/history
///
/// Query parameters:
/// - `minutes` (optional, default 10): How far back to look
pub async fn get_memory_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Json<Vec<MemorySnapshot>> {
    let minutes = params.minutes.unwrap_or(10);
    Json(state.engine.monitor().get_history(minutes))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub minutes: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct BreakerView {
    pub site: String,
    pub state: CircuitState,
}

/// GET /system/breakers
/// Circuit state of every site crawled so far
pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerView>> {
    let breakers = state
        .engine
        .orchestrator()
        .registry()
        .breaker_states()
        .into_iter()
        .map(|(site, state)| BreakerView { site, state })
        .collect();
    Json(breakers)
}
