//! Chain, template and target-text repository traits

use async_trait::async_trait;

use super::{ChainId, RuleChain, RuleTemplate, ScopeId, TemplateId};
use crate::domain::DomainError;

/// Repository trait for rule chain persistence
#[async_trait]
pub trait ChainRepository: Send + Sync + std::fmt::Debug {
    /// Load a chain by ID
    async fn load(&self, id: ChainId) -> Result<Option<RuleChain>, DomainError>;

    /// Get all chains
    async fn list(&self) -> Result<Vec<RuleChain>, DomainError>;

    /// Insert or replace a chain
    async fn save(&self, chain: RuleChain) -> Result<RuleChain, DomainError>;
}

/// Repository trait for reusable rule templates
#[async_trait]
pub trait TemplateRepository: Send + Sync + std::fmt::Debug {
    async fn get(&self, id: TemplateId) -> Result<Option<RuleTemplate>, DomainError>;

    async fn save(&self, template: RuleTemplate) -> Result<RuleTemplate, DomainError>;
}

/// Source of the original text for a target scope
#[async_trait]
pub trait TargetTextRepository: Send + Sync + std::fmt::Debug {
    async fn load_text(&self, scope: ScopeId) -> Result<Option<String>, DomainError>;
}
