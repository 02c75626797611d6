//! Provider resolver trait for resolving model IDs to provider adapters

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use super::LlmProvider;
use crate::domain::DomainError;

/// Resolves the provider adapter that serves a given model.
///
/// The step invoker asks the resolver once per provider call, so routing
/// can follow the model registry rather than a single hardcoded provider.
#[async_trait]
pub trait ProviderResolver: Send + Sync + Debug {
    async fn resolve(&self, model_id: &str) -> Result<Arc<dyn LlmProvider>, DomainError>;
}

/// A resolver that always returns the same provider.
#[derive(Debug)]
pub struct StaticProviderResolver {
    provider: Arc<dyn LlmProvider>,
}

impl StaticProviderResolver {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ProviderResolver for StaticProviderResolver {
    async fn resolve(&self, _model_id: &str) -> Result<Arc<dyn LlmProvider>, DomainError> {
        Ok(self.provider.clone())
    }
}
