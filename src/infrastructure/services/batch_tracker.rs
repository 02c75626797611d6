//! Batch tracker - records batch outcomes so they can be polled

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::domain::chain::{ChainId, ScopeId};
use crate::domain::execution::{BatchAcknowledgment, BatchCoordinator, BatchOutcome};
use crate::domain::DomainError;

/// Snapshot of a batch as seen by a poller
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    #[serde(flatten)]
    pub acknowledgment: BatchAcknowledgment,
    pub pending_chain_ids: Vec<ChainId>,
    pub outcomes: Vec<BatchOutcome>,
    pub finished: bool,
}

impl BatchStatus {
    fn new(acknowledgment: BatchAcknowledgment) -> Self {
        Self {
            pending_chain_ids: acknowledgment.accepted_chain_ids.clone(),
            acknowledgment,
            outcomes: Vec::new(),
            finished: false,
        }
    }

    fn record(&mut self, outcome: BatchOutcome) {
        let chain_id = outcome.chain_id();
        if let Some(pos) = self.pending_chain_ids.iter().position(|id| *id == chain_id) {
            self.pending_chain_ids.remove(pos);
        }
        self.outcomes.push(outcome);
    }
}

/// Starts batches and keeps their outcomes in memory
#[derive(Debug, Clone)]
pub struct BatchTracker {
    coordinator: Arc<BatchCoordinator>,
    batches: Arc<RwLock<HashMap<Uuid, BatchStatus>>>,
}

impl BatchTracker {
    pub fn new(coordinator: Arc<BatchCoordinator>) -> Self {
        Self {
            coordinator,
            batches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Accept a batch; outcomes are collected in the background
    pub async fn start(
        &self,
        target: ScopeId,
        chain_ids: Vec<ChainId>,
    ) -> Result<BatchAcknowledgment, DomainError> {
        let run = self.coordinator.run_batch(target, chain_ids).await?;
        let acknowledgment = run.acknowledgment.clone();
        let batch_id = acknowledgment.batch_id;

        self.batches
            .write()
            .await
            .insert(batch_id, BatchStatus::new(acknowledgment.clone()));

        let batches = self.batches.clone();
        let mut outcomes = run.outcomes;
        tokio::spawn(async move {
            while let Some(outcome) = outcomes.next().await {
                if let Some(status) = batches.write().await.get_mut(&batch_id) {
                    status.record(outcome);
                }
            }
            if let Some(status) = batches.write().await.get_mut(&batch_id) {
                status.finished = true;
            }
            info!(batch_id = %batch_id, "Batch finished");
        });

        Ok(acknowledgment)
    }

    pub async fn get(&self, batch_id: Uuid) -> Option<BatchStatus> {
        self.batches.read().await.get(&batch_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::domain::chain::mock::MockTargetTextRepository;
    use crate::domain::chain::{ExecutionPlan, InputSource, RuleStep, TaskType};
    use crate::domain::estimation::{EstimationConfig, TokenEstimator};
    use crate::domain::execution::{
        BatchConfig, ChainExecutor, ExecutionConfig, HandlerRegistry, InputResolver, PlanSource,
        StepInvoker,
    };
    use crate::domain::llm::{MockLlmProvider, StaticProviderResolver};
    use crate::domain::model::{ModelEntry, ModelRegistry};
    use crate::domain::postprocess::{PostProcessingConfig, PostProcessorRegistry};
    use crate::domain::rag::RagConfig;

    #[derive(Debug)]
    struct OneStepPlans;

    #[async_trait]
    impl PlanSource for OneStepPlans {
        async fn plan(&self, chain_id: ChainId) -> Result<ExecutionPlan, DomainError> {
            Ok(ExecutionPlan::new(
                chain_id,
                "chain",
                vec![RuleStep::new(TaskType::Polish, InputSource::OriginalText, "m")],
            ))
        }
    }

    fn tracker() -> BatchTracker {
        let models = Arc::new(ModelRegistry::new(vec![ModelEntry::new("m", "openai")]));
        let invoker = StepInvoker::new(
            Arc::new(StaticProviderResolver::new(Arc::new(MockLlmProvider::new("mock")))),
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::new(PostProcessorRegistry::with_defaults(&PostProcessingConfig::default())),
            Arc::new(TokenEstimator::new(EstimationConfig::default(), models)),
            ExecutionConfig::default(),
        );
        let executor = ChainExecutor::new(InputResolver::new(RagConfig::default()), invoker);
        let coordinator = BatchCoordinator::new(
            Arc::new(executor),
            Arc::new(OneStepPlans),
            Arc::new(MockTargetTextRepository::new().with_text(ScopeId(1), "text")),
            BatchConfig::default(),
        );
        BatchTracker::new(Arc::new(coordinator))
    }

    #[tokio::test]
    async fn test_outcomes_are_recorded_until_finished() {
        let tracker = tracker();
        let ack = tracker
            .start(ScopeId(1), vec![ChainId(1), ChainId(2), ChainId(3)])
            .await
            .unwrap();

        let mut status = tracker.get(ack.batch_id).await.unwrap();
        for _ in 0..100 {
            if status.finished {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = tracker.get(ack.batch_id).await.unwrap();
        }

        assert!(status.finished);
        assert_eq!(status.outcomes.len(), 3);
        assert!(status.pending_chain_ids.is_empty());
        assert!(status.outcomes.iter().all(BatchOutcome::is_completed));
    }

    #[tokio::test]
    async fn test_unknown_batch() {
        assert!(tracker().get(Uuid::new_v4()).await.is_none());
    }
}
