//! Provider routing by the model registry's provider tag

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::llm::{LlmProvider, ProviderResolver};
use crate::domain::model::ModelRegistry;
use crate::domain::DomainError;

/// Routes each model to the adapter registered for its provider tag
///
/// Models whose tag has no dedicated adapter go to the fallback, if any.
#[derive(Debug, Clone)]
pub struct ProviderRouter {
    models: Arc<ModelRegistry>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    fallback: Option<Arc<dyn LlmProvider>>,
}

impl ProviderRouter {
    pub fn new(models: Arc<ModelRegistry>) -> Self {
        Self {
            models,
            providers: HashMap::new(),
            fallback: None,
        }
    }

    pub fn with_provider(mut self, tag: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(tag.into(), provider);
        self
    }

    pub fn with_fallback(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }
}

#[async_trait]
impl ProviderResolver for ProviderRouter {
    async fn resolve(&self, model_id: &str) -> Result<Arc<dyn LlmProvider>, DomainError> {
        let tag = self.models.provider_of(model_id).ok_or_else(|| {
            DomainError::configuration(format!("Model '{}' is not configured", model_id))
        })?;

        if let Some(provider) = self.providers.get(tag) {
            return Ok(provider.clone());
        }

        debug!(model_id = %model_id, provider = %tag, "No dedicated adapter, using fallback");
        self.fallback.clone().ok_or_else(|| {
            DomainError::configuration(format!("No provider adapter for '{}'", tag))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::MockLlmProvider;
    use crate::domain::model::ModelEntry;

    fn models() -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::new(vec![
            ModelEntry::new("gpt-4o-mini", "openai"),
            ModelEntry::new("qwen", "ollama"),
        ]))
    }

    #[tokio::test]
    async fn test_routes_by_provider_tag() {
        let router = ProviderRouter::new(models())
            .with_provider("openai", Arc::new(MockLlmProvider::new("openai-mock")))
            .with_fallback(Arc::new(MockLlmProvider::new("fallback")));

        let openai = router.resolve("gpt-4o-mini").await.unwrap();
        let local = router.resolve("qwen").await.unwrap();

        assert_eq!(openai.provider_name(), "openai-mock");
        assert_eq!(local.provider_name(), "fallback");
    }

    #[tokio::test]
    async fn test_unknown_model_or_tag_is_configuration_error() {
        let router = ProviderRouter::new(models())
            .with_provider("openai", Arc::new(MockLlmProvider::new("openai-mock")));

        assert!(matches!(
            router.resolve("missing").await,
            Err(DomainError::Configuration { .. })
        ));
        assert!(matches!(
            router.resolve("qwen").await,
            Err(DomainError::Configuration { .. })
        ));
    }
}
