//! Chain, batch and execution request bodies

use serde::{Deserialize, Serialize};

use crate::domain::chain::{ChainId, RuleChain, ScopeId};
use crate::infrastructure::services::ExecuteChainRequest;

/// Body of `POST /v1/chains/{id}/execute`; the chain comes from the path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteChainBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_scope_id: Option<ScopeId>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub stream: bool,
}

impl ExecuteChainBody {
    pub fn into_request(self, chain_id: ChainId) -> ExecuteChainRequest {
        ExecuteChainRequest {
            source_text: self.source_text,
            target_scope_id: self.target_scope_id,
            rule_chain_id: chain_id,
            dry_run: self.dry_run,
            stream: self.stream,
        }
    }
}

/// Body of `POST /v1/batches`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub target_scope_id: ScopeId,
    #[serde(alias = "rule_chain_ids")]
    pub chain_ids: Vec<ChainId>,
}

/// Chain listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSummary {
    pub id: ChainId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub novel_scope: Option<ScopeId>,
    pub step_count: usize,
}

impl From<&RuleChain> for ChainSummary {
    fn from(chain: &RuleChain) -> Self {
        Self {
            id: chain.id(),
            name: chain.name().to_string(),
            description: chain.description().map(str::to_string),
            novel_scope: chain.novel_scope(),
            step_count: chain.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::{InputSource, RuleStep, TaskType};

    #[test]
    fn test_execute_body_defaults() {
        let body: ExecuteChainBody = serde_json::from_str(r#"{"source_text": "Once."}"#).unwrap();
        let request = body.into_request(ChainId(7));

        assert_eq!(request.rule_chain_id, ChainId(7));
        assert_eq!(request.source_text.as_deref(), Some("Once."));
        assert!(!request.dry_run);
        assert!(!request.stream);
    }

    #[test]
    fn test_batch_request_requires_target() {
        assert!(serde_json::from_str::<BatchRequest>(r#"{"chain_ids": [1]}"#).is_err());

        let request: BatchRequest =
            serde_json::from_str(r#"{"target_scope_id": 3, "chain_ids": [1, 2]}"#).unwrap();
        assert_eq!(request.target_scope_id, ScopeId(3));
        assert_eq!(request.chain_ids, vec![ChainId(1), ChainId(2)]);

        let aliased: BatchRequest =
            serde_json::from_str(r#"{"target_scope_id": 3, "rule_chain_ids": [4]}"#).unwrap();
        assert_eq!(aliased.chain_ids, vec![ChainId(4)]);
    }

    #[test]
    fn test_chain_summary() {
        let chain = RuleChain::new(ChainId(2), "Tidy")
            .with_step(RuleStep::new(TaskType::Polish, InputSource::OriginalText, "m"));
        let json = serde_json::to_value(ChainSummary::from(&chain)).unwrap();

        assert_eq!(json["id"], 2);
        assert_eq!(json["step_count"], 1);
        assert!(json.get("description").is_none());
    }
}
