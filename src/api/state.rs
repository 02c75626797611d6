//! Application state for shared services

use std::sync::Arc;

use crate::infrastructure::services::{BatchTracker, ChainService, RagService};

/// Services shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub chain_service: Arc<ChainService>,
    pub rag_service: Arc<RagService>,
    pub batch_tracker: BatchTracker,
}

impl AppState {
    pub fn new(
        chain_service: Arc<ChainService>,
        rag_service: Arc<RagService>,
        batch_tracker: BatchTracker,
    ) -> Self {
        Self {
            chain_service,
            rag_service,
            batch_tracker,
        }
    }
}
