//! Batch submission and polling endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::api::state::AppState;
use crate::api::types::{ApiError, BatchRequest, Json};
use crate::domain::execution::BatchAcknowledgment;
use crate::infrastructure::services::BatchStatus;

/// Accept a batch; chains run in the background
pub async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<(StatusCode, Json<BatchAcknowledgment>), ApiError> {
    let acknowledgment = state
        .batch_tracker
        .start(request.target_scope_id, request.chain_ids)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(acknowledgment)))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchStatus>, ApiError> {
    state
        .batch_tracker
        .get(batch_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Batch {} not found", batch_id)))
}
