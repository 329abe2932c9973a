//! Batch API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tessera_core::domain::job::Job;
use tessera_core::dto::batch::{BatchReceipt, SubmitBatch};
use tessera_core::dto::page::{Page, PageQuery};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::caller::Caller;
use crate::api::error::ApiResult;

/// POST /batches
/// Submit a batch; children are released as admission allows
pub async fn submit_batch(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Json(req): Json<SubmitBatch>,
) -> ApiResult<(StatusCode, Json<BatchReceipt>)> {
    let receipt = state.orchestrator.submit_batch(&owner, req).await?;
    tracing::info!(
        "Accepted batch {} with {} items for {}",
        receipt.batch_id,
        receipt.child_ids.len(),
        owner
    );

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// GET /batches/{id}/children
/// Children of a batch in submission order
pub async fn list_batch_children(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Job>>> {
    Ok(Json(
        state
            .orchestrator
            .get_batch_children(&owner, id, &query)
            .await?,
    ))
}
