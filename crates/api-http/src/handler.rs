//! Route Handlers

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::types::{HealthResponse, ScheduledResponse};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use quarry_core::application::{
    ExecutionMode, RegisterRepository, ScheduleRequest, Scheduled, Scheduler, SchedulerStats,
};
use quarry_core::domain::{Job, Repository};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Run a scheduling call detached from the request
///
/// Inline execution runs the whole job inside this call; a client hanging up must
/// not cancel it halfway.
async fn detached<F, Fut>(scheduler: Arc<Scheduler>, call: F) -> ApiResult<Scheduled>
where
    F: FnOnce(Arc<Scheduler>) -> Fut,
    Fut: Future<Output = quarry_core::Result<Scheduled>> + Send + 'static,
{
    tokio::spawn(call(scheduler))
        .await
        .map_err(|e| ApiError::Internal(format!("scheduling task failed: {}", e)))?
        .map_err(ApiError::from)
}

fn scheduled_response(scheduled: Scheduled) -> (StatusCode, Json<ScheduledResponse>) {
    let status = match scheduled.mode {
        ExecutionMode::Async => StatusCode::ACCEPTED,
        ExecutionMode::Sync => StatusCode::OK,
    };
    (status, Json(scheduled.into()))
}

/// POST /repositories
pub async fn register_repository(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRepository>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Repository>)> {
    let request = body(payload)?;
    let repository = state.scheduler.register(request).await?;
    info!(repository_id = %repository.id, backend = %repository.backend, "Repository registered via API");
    Ok((StatusCode::CREATED, Json(repository)))
}

/// GET /repositories
pub async fn list_repositories(State(state): State<AppState>) -> ApiResult<Json<Vec<Repository>>> {
    Ok(Json(state.scheduler.list_repositories().await?))
}

/// GET /repositories/{id}
pub async fn get_repository(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Repository>> {
    Ok(Json(state.scheduler.repository_status(&id).await?))
}

/// DELETE /repositories/{id}
pub async fn unregister_repository(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.unregister(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /repositories/{id}/jobs
pub async fn list_repository_jobs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.scheduler.list_jobs(&id).await?))
}

/// POST /jobs
pub async fn schedule_job(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ScheduledResponse>)> {
    let request = body(payload)?;
    let scheduled = detached(state.scheduler.clone(), move |scheduler| async move {
        scheduler.schedule_job(request).await
    })
    .await?;
    Ok(scheduled_response(scheduled))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.scheduler.job_status(&id).await?))
}

/// POST /jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.scheduler.cancel_job(&id).await?))
}

/// POST /jobs/{id}/retry
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<ScheduledResponse>)> {
    let scheduled = detached(state.scheduler.clone(), move |scheduler| async move {
        scheduler.retry_job(&id).await
    })
    .await?;
    Ok(scheduled_response(scheduled))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<SchedulerStats>> {
    Ok(Json(state.scheduler.stats().await?))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: quarry_core::VERSION.to_string(),
        mode: state.scheduler.mode(),
    })
}
