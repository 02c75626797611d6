//! Bounded fan-out of chain executions over one target text

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::ChainExecutor;
use super::result::{ChainExecutionResult, ChainStatus};
use super::BatchConfig;
use crate::domain::chain::{ChainId, ExecutionPlan, ScopeId, TargetTextRepository};
use crate::domain::DomainError;

/// Supplies validated execution plans by chain ID
#[async_trait]
pub trait PlanSource: Send + Sync + Debug {
    async fn plan(&self, chain_id: ChainId) -> Result<ExecutionPlan, DomainError>;
}

/// Returned to the caller as soon as a batch is accepted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchAcknowledgment {
    pub batch_id: Uuid,
    pub target_scope_id: ScopeId,
    pub accepted_chain_ids: Vec<ChainId>,
    pub accepted_at: DateTime<Utc>,
}

/// Outcome of one chain within a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// The chain ran; its own status says whether it completed
    Executed { chain_id: ChainId, result: ChainExecutionResult },
    /// The chain could not be started at all
    Rejected { chain_id: ChainId, error: String },
}

impl BatchOutcome {
    pub fn chain_id(&self) -> ChainId {
        match self {
            Self::Executed { chain_id, .. } | Self::Rejected { chain_id, .. } => *chain_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Executed { result, .. } if result.status == ChainStatus::Completed)
    }
}

/// An accepted batch: its acknowledgment plus outcomes as they complete
#[derive(Debug)]
pub struct BatchRun {
    pub acknowledgment: BatchAcknowledgment,
    pub outcomes: ReceiverStream<BatchOutcome>,
    /// Cancels every chain of this batch; other batches are unaffected
    pub cancel: CancellationToken,
}

/// Runs many chains over one target with bounded concurrency
///
/// The worker pool is shared by every batch started from the same
/// coordinator, so concurrent batches together stay under the limit.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    executor: Arc<ChainExecutor>,
    plans: Arc<dyn PlanSource>,
    texts: Arc<dyn TargetTextRepository>,
    permits: Arc<Semaphore>,
    config: BatchConfig,
}

impl BatchCoordinator {
    pub fn new(
        executor: Arc<ChainExecutor>,
        plans: Arc<dyn PlanSource>,
        texts: Arc<dyn TargetTextRepository>,
        config: BatchConfig,
    ) -> Self {
        Self {
            executor,
            plans,
            texts,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Accept a batch and start its chains in the background
    ///
    /// Fails only when the batch as a whole is unusable (no chains or no
    /// such target). Per-chain problems arrive as outcomes.
    pub async fn run_batch(
        &self,
        target: ScopeId,
        chain_ids: Vec<ChainId>,
    ) -> Result<BatchRun, DomainError> {
        if chain_ids.is_empty() {
            return Err(DomainError::validation("A batch needs at least one chain"));
        }

        let text = self
            .texts
            .load_text(target)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Target text {} not found", target)))?;
        let text: Arc<str> = Arc::from(text);

        let acknowledgment = BatchAcknowledgment {
            batch_id: Uuid::new_v4(),
            target_scope_id: target,
            accepted_chain_ids: chain_ids.clone(),
            accepted_at: Utc::now(),
        };
        let batch_id = acknowledgment.batch_id;

        info!(
            batch_id = %batch_id,
            target = %target,
            chains = chain_ids.len(),
            "Batch accepted"
        );

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(chain_ids.len());

        for chain_id in chain_ids {
            let worker = self.clone();
            let tx = tx.clone();
            let text = text.clone();
            let cancel = cancel.child_token();

            tokio::spawn(async move {
                let outcome = worker.run_chain(batch_id, chain_id, &text, &cancel).await;
                if tx.send(outcome).await.is_err() {
                    debug!(batch_id = %batch_id, chain_id = %chain_id, "Batch receiver dropped");
                }
            });
        }

        Ok(BatchRun {
            acknowledgment,
            outcomes: ReceiverStream::new(rx),
            cancel,
        })
    }

    async fn run_chain(
        &self,
        batch_id: Uuid,
        chain_id: ChainId,
        text: &str,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let plan = match self.plans.plan(chain_id).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(batch_id = %batch_id, chain_id = %chain_id, error = %e, "Chain rejected");
                return BatchOutcome::Rejected {
                    chain_id,
                    error: e.to_string(),
                };
            }
        };

        // A batch cancelled while waiting still reports each chain as cancelled
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return BatchOutcome::Rejected {
                        chain_id,
                        error: "worker pool is closed".to_string(),
                    };
                }
            },
        };

        debug!(batch_id = %batch_id, chain_id = %chain_id, "Chain started");
        let result = self.executor.execute(&plan, text, cancel).await;
        debug!(
            batch_id = %batch_id,
            chain_id = %chain_id,
            status = ?result.status,
            "Chain finished"
        );

        BatchOutcome::Executed { chain_id, result }
    }
}
