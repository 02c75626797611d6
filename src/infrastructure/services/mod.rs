//! Infrastructure services

mod batch_tracker;
mod chain_service;
mod rag_service;

pub use batch_tracker::{BatchStatus, BatchTracker};
pub use chain_service::{ChainService, ExecuteChainRequest};
pub use rag_service::{
    RagGenerateRequest, RagGenerateResponse, RagService, SearchRequest, SearchResponse,
};
