//! Explicit engine configuration and executor assembly

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::estimation::{CostLevelThresholds, EstimationConfig, TokenEstimator};
use crate::domain::execution::{
    BatchConfig, ChainExecutor, ExecutionConfig, HandlerRegistry, InputResolver, StepInvoker,
};
use crate::domain::llm::ProviderResolver;
use crate::domain::model::{ModelEntry, ModelRegistry};
use crate::domain::postprocess::{PostProcessingConfig, PostProcessorRegistry};
use crate::domain::rag::{RagConfig, VectorQuery};

/// Everything the engine needs to know, handed to its constructors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimation: EstimationConfig,
    pub models: Vec<ModelEntry>,
    pub cost_levels: CostLevelThresholds,
    pub rag: RagConfig,
    pub execution: ExecutionConfig,
    pub batch: BatchConfig,
    pub post_processing: PostProcessingConfig,
}

impl EngineConfig {
    pub fn model_registry(&self) -> ModelRegistry {
        ModelRegistry::new(self.models.iter().cloned())
    }

    /// Assemble an executor over the given collaborators
    pub fn build_executor(
        &self,
        providers: Arc<dyn ProviderResolver>,
        index: Option<Arc<dyn VectorQuery>>,
    ) -> ChainExecutor {
        let models = Arc::new(self.model_registry());
        let estimator = TokenEstimator::new(self.estimation.clone(), models)
            .with_thresholds(self.cost_levels);

        let invoker = StepInvoker::new(
            providers,
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::new(PostProcessorRegistry::with_defaults(&self.post_processing)),
            Arc::new(estimator),
            self.execution.clone(),
        );

        let mut resolver = InputResolver::new(self.rag.clone());
        if let Some(index) = index {
            resolver = resolver.with_index(index);
        }

        ChainExecutor::new(resolver, invoker)
    }
}
