//! API Module
//!
//! HTTP API layer of the crawl server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod system;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/job/submit", post(job::submit_job))
        .route("/job/list", get(job::list_jobs))
        .route("/job/{id}", get(job::get_job))
        .route("/job/{id}/status", get(job::get_job_status))
        .route("/job/{id}/stats", get(job::get_job_stats))
        .route("/job/{id}/logs", get(job::get_job_logs))
        .route("/job/{id}/cancel", post(job::cancel_job))
        .route("/job/{id}/pause", post(job::pause_job))
        .route("/job/{id}/resume", post(job::resume_job))
        // System endpoints
        .route("/system/status", get(system::get_status))
        .route("/system/memory", get(system::get_memory))
        .route("/system/memory/history", get(system::get_memory_history))
        .route("/system/breakers", get(system::get_breakers))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
