use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::errors::ChronodError;
use crate::executor::validate_command;
use crate::models::{JobUpdate, NewJob};

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_reply(err: &ChronodError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, kind) = match err {
        ChronodError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ChronodError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        ChronodError::Validation(_) | ChronodError::Cron(_) => {
            (StatusCode::BAD_REQUEST, "invalid_input")
        }
        ChronodError::ScheduleUnreachable(_) => (StatusCode::BAD_REQUEST, "schedule_unreachable"),
        ChronodError::Storage(_) | ChronodError::Execution(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: kind.to_string(),
            message: err.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Query params
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /healthz
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /api/v1/jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewJob>,
) -> impl IntoResponse {
    // Reject unresolvable commands at registration instead of at first fire.
    if let Err(e) = validate_command(&new.command) {
        return error_reply(&e).into_response();
    }
    match state.job_store.create_job(new).await {
        Ok(job) => {
            tracing::info!(job_id = %job.id, job_name = %job.name, "job created");
            (StatusCode::CREATED, Json(job)).into_response()
        }
        Err(e) => error_reply(&e).into_response(),
    }
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match state.job_store.list_jobs(params.limit, params.offset).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => error_reply(&e).into_response(),
    }
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.job_store.get_job(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_reply(&e).into_response(),
    }
}

/// PUT /api/v1/jobs/{id}
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<JobUpdate>,
) -> impl IntoResponse {
    if let Some(ref command) = update.command {
        if let Err(e) = validate_command(command) {
            return error_reply(&e).into_response();
        }
    }
    match state.job_store.update_job(id, update).await {
        Ok(job) => {
            tracing::info!(job_id = %job.id, job_name = %job.name, "job updated");
            Json(job).into_response()
        }
        Err(e) => error_reply(&e).into_response(),
    }
}

/// DELETE /api/v1/jobs/{id}
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.job_store.delete_job(id).await {
        Ok(()) => {
            tracing::info!(job_id = %id, "job deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_reply(&e).into_response(),
    }
}

/// GET /api/v1/jobs/{id}/runs
pub async fn list_job_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    // Surface a 404 for unknown jobs rather than an empty history.
    if let Err(e) = state.job_store.get_job(id).await {
        return error_reply(&e).into_response();
    }
    match state
        .run_store
        .list_runs(Some(id), params.limit, params.offset)
        .await
    {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => error_reply(&e).into_response(),
    }
}

/// GET /api/v1/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match state
        .run_store
        .list_runs(None, params.limit, params.offset)
        .await
    {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => error_reply(&e).into_response(),
    }
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.run_store.get_run(id).await {
        Ok(run) => Json(run).into_response(),
        Err(e) => error_reply(&e).into_response(),
    }
}
