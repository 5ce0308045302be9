//! Job API Handlers
//!
//! HTTP endpoints for job submission, control and inspection.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use pricewatch_core::domain::job::{Job, JobStatus};
use pricewatch_core::domain::log::LogEntry;
use pricewatch_core::dto::job::{JobStats, JobStatusView, SubmitJob};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// POST /job/submit
/// Create a job and start crawling its items
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJob>,
) -> ApiResult<Json<Job>> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    if req.site_name.trim().is_empty() {
        return Err(ApiError::BadRequest("site_name is required".to_string()));
    }

    let orchestrator = state.engine.orchestrator();
    let _guard = state.submit_lock.lock().await;
    let running = orchestrator.active_jobs().len();
    if running >= state.max_concurrent_jobs {
        return Err(ApiError::TooManyRequests(format!(
            "{} jobs already running (limit {})",
            running, state.max_concurrent_jobs
        )));
    }

    tracing::info!(
        "Submitting job for site {} with {} items",
        req.site_name,
        req.items.len()
    );

    let job = orchestrator.submit_items(req).await?;
    Ok(Json(job))
}

/// POST /job/{id}/cancel
/// Request cooperative cancellation of a running job
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusView>> {
    let orchestrator = state.engine.orchestrator();
    if !orchestrator.cancel(id).await? {
        return Err(ApiError::Conflict(format!("Job {} is not running", id)));
    }

    Ok(Json(orchestrator.get_status(id).await?))
}

/// POST /job/{id}/pause
/// Hold a running job before its next batch
pub async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusView>> {
    let orchestrator = state.engine.orchestrator();
    if !orchestrator.pause(id).await? {
        return Err(ApiError::Conflict(format!("Job {} is not running", id)));
    }

    Ok(Json(orchestrator.get_status(id).await?))
}

/// POST /job/{id}/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusView>> {
    let orchestrator = state.engine.orchestrator();
    if !orchestrator.resume(id).await? {
        return Err(ApiError::Conflict(format!("Job {} is not running", id)));
    }

    Ok(Json(orchestrator.get_status(id).await?))
}

// =============================================================================
// Job Query Endpoints
// =============================================================================

/// GET /job/{id}
/// Get the full job record
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);
    Ok(Json(state.engine.orchestrator().get_job(id).await?))
}

/// GET /job/{id}/status
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusView>> {
    Ok(Json(state.engine.orchestrator().get_status(id).await?))
}

/// GET /job/{id}/stats
pub async fn get_job_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStats>> {
    Ok(Json(state.engine.orchestrator().get_stats(id).await?))
}

/// GET /job/{id}/logs
/// Get all log entries for a job
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    if state.store.get_job(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Job {} not found", id)));
    }

    Ok(Json(state.store.get_logs(id).await?))
}

/// GET /job/list
/// List jobs, newest first
///
/// Query parameters:
/// - `user_id` (optional): Only jobs of this user
/// - `status` (optional): Only jobs in this status, e.g. `Running`
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let status = match params.status.as_deref() {
        Some(s) => Some(
            JobStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown job status '{}'", s)))?,
        ),
        None => None,
    };

    let jobs = state
        .store
        .list_jobs(params.user_id.as_deref(), status)
        .await?;

    Ok(Json(jobs))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub user_id: Option<String>,
    pub status: Option<String>,
}
