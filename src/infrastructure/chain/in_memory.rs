//! In-memory repositories for chains, templates and target texts

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::chain::{
    ChainId, ChainRepository, RuleChain, RuleTemplate, ScopeId, TargetTextRepository, TemplateId,
    TemplateRepository,
};
use crate::domain::DomainError;

#[derive(Debug, Default)]
pub struct InMemoryChainRepository {
    chains: RwLock<HashMap<ChainId, RuleChain>>,
}

impl InMemoryChainRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChainRepository for InMemoryChainRepository {
    async fn load(&self, id: ChainId) -> Result<Option<RuleChain>, DomainError> {
        Ok(self.chains.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<RuleChain>, DomainError> {
        let mut chains: Vec<RuleChain> = self.chains.read().await.values().cloned().collect();
        chains.sort_by_key(RuleChain::id);
        Ok(chains)
    }

    async fn save(&self, chain: RuleChain) -> Result<RuleChain, DomainError> {
        self.chains.write().await.insert(chain.id(), chain.clone());
        Ok(chain)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<TemplateId, RuleTemplate>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn get(&self, id: TemplateId) -> Result<Option<RuleTemplate>, DomainError> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn save(&self, template: RuleTemplate) -> Result<RuleTemplate, DomainError> {
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        Ok(template)
    }
}

/// Target texts keyed by scope
#[derive(Debug, Default)]
pub struct InMemoryTargetTextRepository {
    texts: RwLock<HashMap<ScopeId, String>>,
}

impl InMemoryTargetTextRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, scope: ScopeId, text: impl Into<String>) {
        self.texts.write().await.insert(scope, text.into());
    }
}

#[async_trait]
impl TargetTextRepository for InMemoryTargetTextRepository {
    async fn load_text(&self, scope: ScopeId) -> Result<Option<String>, DomainError> {
        Ok(self.texts.read().await.get(&scope).cloned())
    }
}
