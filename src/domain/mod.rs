//! Domain layer - chain model, engine and collaborator contracts

pub mod chain;
pub mod engine;
pub mod error;
pub mod estimation;
pub mod execution;
pub mod llm;
pub mod model;
pub mod postprocess;
pub mod rag;

pub use chain::{
    ChainId, ChainRepository, ChainValidator, ExecutionPlan, InputSource, RuleChain, RuleStep,
    RuleTemplate, ScopeId, TaskType, TemplateId,
};
pub use engine::EngineConfig;
pub use error::DomainError;
pub use estimation::{CostEstimate, CostLevel, TokenEstimator};
pub use execution::{
    BatchCoordinator, ChainEvent, ChainExecutionResult, ChainExecutor, DryRunEstimate,
    ExecutionError, StepResult,
};
pub use llm::{FinishReason, LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamChunk, Usage};
