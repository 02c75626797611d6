//! Development seed data loaded from a JSON file

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::{InMemoryChainRepository, InMemoryTargetTextRepository, InMemoryTemplateRepository};
use crate::domain::chain::{ChainRepository, RuleChain, RuleTemplate, ScopeId, TemplateRepository};
use crate::domain::DomainError;
use crate::infrastructure::knowledge_base::{InMemoryVectorIndex, IndexedDocument};

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTarget {
    pub scope_id: ScopeId,
    pub text: String,
}

/// Contents of a seed file; every section is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub templates: Vec<RuleTemplate>,
    pub chains: Vec<RuleChain>,
    pub targets: Vec<SeedTarget>,
    pub documents: Vec<IndexedDocument>,
}

impl SeedData {
    pub fn from_json(json: &str) -> Result<Self, DomainError> {
        serde_json::from_str(json)
            .map_err(|e| DomainError::configuration(format!("Invalid seed data: {}", e)))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, DomainError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            DomainError::configuration(format!("Cannot read seed file {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Load everything into the in-memory stores
    pub async fn apply(
        self,
        chains: &InMemoryChainRepository,
        templates: &InMemoryTemplateRepository,
        targets: &InMemoryTargetTextRepository,
        index: &InMemoryVectorIndex,
    ) -> Result<(), DomainError> {
        let counts = (
            self.chains.len(),
            self.templates.len(),
            self.targets.len(),
            self.documents.len(),
        );

        for template in self.templates {
            templates.save(template).await?;
        }
        for chain in self.chains {
            chains.save(chain).await?;
        }
        for target in self.targets {
            targets.insert(target.scope_id, target.text).await;
        }
        index.add_documents(self.documents).await;

        info!(
            chains = counts.0,
            templates = counts.1,
            targets = counts.2,
            documents = counts.3,
            "Seed data loaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::{ChainId, StepSource, TargetTextRepository, TemplateId};
    use crate::domain::rag::VectorQuery;

    const SEED: &str = r#"{
        "templates": [{
            "id": 10,
            "name": "House polish",
            "step": {
                "task_type": "POLISH",
                "input_source": {"kind": "PREVIOUS_STEP"},
                "model_id": "gpt-4o-mini",
                "post_processing_rules": ["trim"]
            }
        }],
        "chains": [{
            "id": 1,
            "name": "Summarize then polish",
            "steps": [
                {"order": 0, "source": "private", "step": {
                    "task_type": "SUMMARIZE",
                    "input_source": {"kind": "ORIGINAL_TEXT"},
                    "model_id": "gpt-4o-mini",
                    "parameters": {"ratio": {"param_type": "static_number", "value": 0.3}}
                }},
                {"order": 1, "source": "template", "template_id": 10}
            ]
        }],
        "targets": [{"scope_id": 3, "text": "It was a dark night."}],
        "documents": [{"id": "d1", "text": "The night was dark.", "scope_id": 3}]
    }"#;

    #[tokio::test]
    async fn test_seed_populates_stores() {
        let chains = InMemoryChainRepository::new();
        let templates = InMemoryTemplateRepository::new();
        let targets = InMemoryTargetTextRepository::new();
        let index = InMemoryVectorIndex::new();

        SeedData::from_json(SEED)
            .unwrap()
            .apply(&chains, &templates, &targets, &index)
            .await
            .unwrap();

        let chain = chains.load(ChainId(1)).await.unwrap().unwrap();
        assert_eq!(chain.len(), 2);
        assert!(matches!(chain.steps()[1].source, StepSource::Template { .. }));
        assert!(templates.get(TemplateId(10)).await.unwrap().is_some());
        assert!(targets.load_text(ScopeId(3)).await.unwrap().is_some());
        assert_eq!(index.query("night", 1, Some(ScopeId(3))).await.unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_seed_is_configuration_error() {
        assert!(matches!(
            SeedData::from_json("{\"chains\": 5}"),
            Err(DomainError::Configuration { .. })
        ));
        assert!(SeedData::from_json("{}").unwrap().chains.is_empty());
    }
}
