//! Chain execution engine
//!
//! Resolution, invocation and traversal of validated execution plans, plus
//! the batch coordinator that fans plans out over a bounded worker pool.

mod batch;
mod context;
mod error;
mod executor;
mod handler;
mod invoker;
mod resolver;
mod result;

pub use batch::{BatchAcknowledgment, BatchCoordinator, BatchOutcome, BatchRun, PlanSource};
pub use context::{ExecutionContext, ORIGINAL_VARIABLE, PREVIOUS_VARIABLE};
pub use error::ExecutionError;
pub use executor::{ChainEventStream, ChainExecutor};
pub use handler::{
    HandlerRegistry, LlmTaskHandler, PassthroughHandler, StepHandler, StepPlan, WordCountHandler,
};
pub use invoker::{Delivery, StepInvoker};
pub use resolver::{InputResolver, ResolvedInput, RunMode};
pub use result::{
    snippet, ChainEvent, ChainExecutionResult, ChainStatus, DryRunEstimate, StepEstimate,
    StepResult, StepStatus, TokenUsage,
};

use serde::{Deserialize, Serialize};

/// Per-step execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Provider call timeout when a step declares none
    pub step_timeout_ms: u64,
    /// Completion budget when neither the step nor the model declares one
    pub default_max_completion_tokens: u32,
    /// Maximum length of input/output snippets in step results, in graphemes
    pub snippet_chars: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 120_000,
            default_max_completion_tokens: 2048,
            snippet_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Chains running at the same time within the whole engine
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_concurrency: 2 }
    }
}
