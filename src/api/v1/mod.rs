//! Versioned HTTP endpoints

pub mod batches;
pub mod chains;
pub mod rag;

use axum::{
    routing::{get, post},
    Router,
};

use super::state::AppState;

/// Create v1 API router
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/chains", get(chains::list_chains))
        .route("/chains/{chain_id}/execute", post(chains::execute_chain))
        .route("/rag/generate", post(rag::generate))
        .route("/search", post(rag::search))
        .route("/batches", post(batches::create_batch))
        .route("/batches/{batch_id}", get(batches::get_batch))
}
