//! Retrieval-augmented generation: vector query contract and retrieval adapter

mod retriever;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::chain::ScopeId;
use crate::domain::DomainError;

pub use retriever::RagRetriever;

/// Where retrieved context goes relative to the step instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPlacement {
    #[default]
    InstructionFirst,
    ContextFirst,
}

/// Retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub max_top_n: u32,
    pub default_top_n: u32,
    /// Placeholder snippet size used by dry runs
    pub average_chunk_chars: usize,
    pub placement: ContextPlacement,
    /// Word-overlap ratio at or above which two snippets count as duplicates
    pub dedup_threshold: f64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_top_n: 20,
            default_top_n: 5,
            average_chunk_chars: 500,
            placement: ContextPlacement::default(),
            dedup_threshold: 0.9,
        }
    }
}

impl RagConfig {
    /// Requested top-N, defaulted and clamped to `1..=max_top_n`
    pub fn bounded_top_n(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_top_n)
            .clamp(1, self.max_top_n.max(1))
    }

    /// Placeholder snippets sized like real ones, for estimates
    pub fn placeholder_snippets(&self, top_n: u32) -> Vec<String> {
        (0..top_n)
            .map(|_| "x".repeat(self.average_chunk_chars))
            .collect()
    }
}

/// A snippet returned by the similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Lower is closer
    pub distance: f32,
}

impl RetrievedSnippet {
    pub fn new(id: impl Into<String>, text: impl Into<String>, distance: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: HashMap::new(),
            distance,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Similarity-search collaborator
#[async_trait]
pub trait VectorQuery: Send + Sync + std::fmt::Debug {
    async fn query(
        &self,
        text: &str,
        top_n: u32,
        scope: Option<ScopeId>,
    ) -> Result<Vec<RetrievedSnippet>, DomainError>;
}
