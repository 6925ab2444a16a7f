//! HTTP route handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde_json::json;
use tracing::info;

use aggsched_types::{CreateJobRequest, JobId, JobSummary, MetricConfig};

use crate::GatewayState;
use crate::response::{ApiError, CommonResponse};

/// GET /health
pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "scheduled_jobs": state.scheduler.registry().len().await,
    }))
}

/// POST /api/v1/cron/add
pub async fn add_job(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<Json<CommonResponse<JobSummary>>, ApiError> {
    let Json(request) = body?;
    let spec = request.validate(&state.catalog)?;
    let job = state
        .scheduler
        .add_job(spec)
        .await
        .map_err(ApiError::from_create)?;
    info!(job_id = job.id, job_name = %job.name, "New schedule created");
    Ok(CommonResponse::ok(JobSummary::from(job)))
}

/// GET /api/v1/cron/jobs
pub async fn list_jobs(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<CommonResponse<Vec<JobSummary>>>, ApiError> {
    let jobs = state.scheduler.list_jobs().await?;
    Ok(CommonResponse::ok(jobs))
}

/// DELETE /api/v1/cron/job/{id}
pub async fn delete_job(
    State(state): State<Arc<GatewayState>>,
    id: Result<Path<JobId>, PathRejection>,
) -> Result<Json<CommonResponse<()>>, ApiError> {
    let Path(id) = id?;
    state.scheduler.remove_job(id).await?;
    info!(job_id = id, "Schedule deleted");
    Ok(CommonResponse::ok_empty())
}

/// GET /api/v1/metadata
pub async fn metadata(State(state): State<Arc<GatewayState>>) -> Json<CommonResponse<Vec<MetricConfig>>> {
    CommonResponse::ok(state.catalog.metrics.clone())
}
