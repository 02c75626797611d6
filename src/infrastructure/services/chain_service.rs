//! Chain service - loads, validates and runs rule chains

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::chain::{
    ChainId, ChainRepository, ChainValidator, ExecutionPlan, RuleChain, ScopeId,
    TargetTextRepository, TemplateRepository,
};
use crate::domain::execution::{
    ChainEventStream, ChainExecutionResult, ChainExecutor, DryRunEstimate, PlanSource,
};
use crate::domain::DomainError;

/// Execution request; the text comes from `source_text` or the target scope
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteChainRequest {
    #[serde(default)]
    pub source_text: Option<String>,
    #[serde(default)]
    pub target_scope_id: Option<ScopeId>,
    pub rule_chain_id: ChainId,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub stream: bool,
}

impl ExecuteChainRequest {
    pub fn new(rule_chain_id: ChainId) -> Self {
        Self {
            source_text: None,
            target_scope_id: None,
            rule_chain_id,
            dry_run: false,
            stream: false,
        }
    }

    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = Some(text.into());
        self
    }

    pub fn with_target(mut self, scope: ScopeId) -> Self {
        self.target_scope_id = Some(scope);
        self
    }
}

/// Entry point for chain execution outside the engine
pub struct ChainService {
    chains: Arc<dyn ChainRepository>,
    templates: Arc<dyn TemplateRepository>,
    texts: Arc<dyn TargetTextRepository>,
    executor: Arc<ChainExecutor>,
}

impl std::fmt::Debug for ChainService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainService").finish()
    }
}

impl ChainService {
    pub fn new(
        chains: Arc<dyn ChainRepository>,
        templates: Arc<dyn TemplateRepository>,
        texts: Arc<dyn TargetTextRepository>,
        executor: Arc<ChainExecutor>,
    ) -> Self {
        Self {
            chains,
            templates,
            texts,
            executor,
        }
    }

    pub fn executor(&self) -> &Arc<ChainExecutor> {
        &self.executor
    }

    pub async fn list(&self) -> Result<Vec<RuleChain>, DomainError> {
        self.chains.list().await
    }

    /// Load a chain with its templates and validate it into a plan
    pub async fn plan(&self, chain_id: ChainId) -> Result<ExecutionPlan, DomainError> {
        let chain = self
            .chains
            .load(chain_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Chain {} not found", chain_id)))?;

        let mut templates = HashMap::new();
        for template_id in chain.template_ids() {
            if let Some(template) = self.templates.get(template_id).await? {
                templates.insert(template_id, template);
            }
        }

        let invoker = self.executor.invoker();
        let validator = ChainValidator::new(
            invoker.estimator().models(),
            invoker.postprocessors(),
            invoker.handlers(),
        );
        let plan = validator
            .validate(&chain, &templates)
            .map_err(|e| DomainError::validation(e.to_string()))?;

        debug!(chain_id = %chain_id, steps = plan.len(), "Chain validated");
        Ok(plan)
    }

    /// The plan and original text for a request
    async fn prepare(
        &self,
        request: &ExecuteChainRequest,
    ) -> Result<(ExecutionPlan, String), DomainError> {
        let mut plan = self.plan(request.rule_chain_id).await?;
        if plan.novel_scope.is_none() {
            plan.novel_scope = request.target_scope_id;
        }

        let text = match (&request.source_text, request.target_scope_id) {
            (Some(text), _) => text.clone(),
            (None, Some(scope)) => self.texts.load_text(scope).await?.ok_or_else(|| {
                DomainError::not_found(format!("Target text {} not found", scope))
            })?,
            (None, None) => {
                return Err(DomainError::validation(
                    "Either source_text or target_scope_id is required",
                ));
            }
        };

        Ok((plan, text))
    }

    pub async fn execute(
        &self,
        request: &ExecuteChainRequest,
        cancel: &CancellationToken,
    ) -> Result<ChainExecutionResult, DomainError> {
        let (plan, text) = self.prepare(request).await?;
        info!(chain_id = %plan.chain_id, "Executing chain");
        Ok(self.executor.execute(&plan, &text, cancel).await)
    }

    pub async fn dry_run(
        &self,
        request: &ExecuteChainRequest,
    ) -> Result<DryRunEstimate, DomainError> {
        let (plan, text) = self.prepare(request).await?;
        Ok(self.executor.dry_run(&plan, &text).await)
    }

    /// Start a streaming execution; validation errors surface before any event
    pub async fn stream(
        &self,
        request: &ExecuteChainRequest,
        cancel: CancellationToken,
    ) -> Result<ChainEventStream, DomainError> {
        let (plan, text) = self.prepare(request).await?;
        info!(chain_id = %plan.chain_id, "Streaming chain");
        Ok(self.executor.clone().execute_stream(plan, text, cancel))
    }
}

#[async_trait]
impl PlanSource for ChainService {
    async fn plan(&self, chain_id: ChainId) -> Result<ExecutionPlan, DomainError> {
        ChainService::plan(self, chain_id).await
    }
}
