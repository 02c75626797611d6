//! RAG service - one-off retrieval-augmented generation and similarity search

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::chain::{
    GenerationConstraints, InputSource, PlannedStep, RuleStep, ScopeId, TaskType,
};
use crate::domain::execution::{
    ChainExecutor, Delivery, ExecutionContext, RunMode, StepStatus, TokenUsage,
};
use crate::domain::model::LlmOverrideParameters;
use crate::domain::rag::RetrievedSnippet;
use crate::domain::DomainError;

#[derive(Debug, Clone, Deserialize)]
pub struct RagGenerateRequest {
    pub instruction: String,
    #[serde(default)]
    pub top_n_context: Option<u32>,
    pub model_id: String,
    #[serde(default)]
    pub llm_override_parameters: Option<LlmOverrideParameters>,
    #[serde(default)]
    pub generation_constraints: Option<GenerationConstraints>,
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagGenerateResponse {
    pub generated_text: String,
    pub retrieved_context_snippets: Vec<String>,
    /// Milliseconds spent in the similarity search
    pub search_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_n: Option<u32>,
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query_text: String,
    pub results: Vec<RetrievedSnippet>,
    /// Milliseconds spent in the similarity search
    pub search_time: f64,
}

/// Runs single retrieval steps through the same resolver and invoker as chains
#[derive(Debug, Clone)]
pub struct RagService {
    executor: Arc<ChainExecutor>,
}

impl RagService {
    pub fn new(executor: Arc<ChainExecutor>) -> Self {
        Self { executor }
    }

    pub async fn generate(
        &self,
        request: RagGenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<RagGenerateResponse, DomainError> {
        if request.instruction.trim().is_empty() {
            return Err(DomainError::validation("instruction must not be empty"));
        }
        if !self.executor.invoker().estimator().models().contains(&request.model_id) {
            return Err(DomainError::validation(format!(
                "Unknown model '{}'",
                request.model_id
            )));
        }

        let source = InputSource::RagRetrieval {
            top_n: request.top_n_context,
            query: None,
            placement: None,
        };
        let step = RuleStep::new(TaskType::CustomInstruction, source, request.model_id)
            .with_instruction(request.instruction.clone())
            .with_llm_overrides(request.llm_override_parameters.unwrap_or_default())
            .with_generation_constraints(request.generation_constraints.unwrap_or_default());

        let context = ExecutionContext::new(&request.instruction);
        let resolved = self
            .executor
            .resolver()
            .resolve(&step, 0, &context, request.scope_id, RunMode::Execute)
            .await
            .map_err(|e| DomainError::knowledge_base(e.to_string()))?;

        let planned = PlannedStep {
            order: 0,
            step,
            template_id: None,
        };
        let result = self
            .executor
            .invoker()
            .invoke(&planned, &resolved, RunMode::Execute, Delivery::Complete, cancel)
            .await;

        if result.status != StepStatus::Success {
            let message = result.error.unwrap_or_else(|| "generation failed".to_string());
            return Err(DomainError::provider(planned.step.model_id(), message));
        }

        let search_time = resolved
            .retrieval_time
            .map(|t| t.as_secs_f64() * 1000.0)
            .unwrap_or_default();
        info!(
            snippets = resolved.snippets.len(),
            search_ms = search_time,
            "RAG generation finished"
        );

        Ok(RagGenerateResponse {
            generated_text: result.output.unwrap_or_default(),
            retrieved_context_snippets: resolved.snippets,
            search_time,
            usage: result.usage,
        })
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, DomainError> {
        let retriever = self
            .executor
            .resolver()
            .retriever()
            .ok_or_else(|| DomainError::configuration("No vector index is configured"))?;

        let started = Instant::now();
        let results = retriever
            .retrieve(&request.query, request.scope_id, request.top_n)
            .await?;

        Ok(SearchResponse {
            query_text: request.query,
            results,
            search_time: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
