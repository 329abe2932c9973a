//! Job API Handlers
//!
//! HTTP endpoints for individual jobs and for reading or cancelling any job.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tessera_core::domain::job::Job;
use tessera_core::dto::job::{JobReceipt, ListJobs, SubmitJob};
use tessera_core::dto::page::Page;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::caller::Caller;
use crate::api::error::ApiResult;

/// POST /jobs
/// Submit one prediction job
pub async fn submit_job(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Json(req): Json<SubmitJob>,
) -> ApiResult<(StatusCode, Json<JobReceipt>)> {
    let receipt = state.orchestrator.submit_individual(&owner, req).await?;
    tracing::info!("Accepted job {} for {}", receipt.job_id, owner);

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(state.orchestrator.get_job(&owner, id).await?))
}

/// GET /jobs?status=&kind=&page_token=&limit=
/// List the caller's jobs, newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Query(query): Query<ListJobs>,
) -> ApiResult<Json<Page<Job>>> {
    Ok(Json(state.orchestrator.list_jobs(&owner, &query).await?))
}

/// POST /jobs/{id}/cancel
/// Cancel a job or a whole batch
pub async fn cancel_job(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    let job = state.orchestrator.cancel(&owner, id).await?;
    tracing::info!("Cancelled job {}", id);

    Ok(Json(job))
}
