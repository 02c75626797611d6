//! Retrieval-augmented generation and similarity search endpoints

use axum::extract::State;
use tokio_util::sync::CancellationToken;

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::infrastructure::services::{
    RagGenerateRequest, RagGenerateResponse, SearchRequest, SearchResponse,
};

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<RagGenerateRequest>,
) -> Result<Json<RagGenerateResponse>, ApiError> {
    let response = state
        .rag_service
        .generate(request, &CancellationToken::new())
        .await?;
    Ok(Json(response))
}

pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty").with_param("query"));
    }

    Ok(Json(state.rag_service.search(request).await?))
}
