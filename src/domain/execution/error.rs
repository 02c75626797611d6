use thiserror::Error;

use crate::domain::chain::TaskType;
use crate::domain::DomainError;

/// Per-step failures raised while a chain runs
///
/// These never escape the executor: each one becomes a failed step result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("step {step_order} reads the previous step's output, but no step has completed yet")]
    MissingPredecessorOutput { step_order: u32 },

    #[error("variable '{name}' has not been produced by an earlier step")]
    UnknownVariableReference { name: String },

    #[error("context retrieval failed: {message}")]
    RetrievalFailed { message: String },

    #[error("provider '{provider}' failed: {message}")]
    ProviderInvocation { provider: String, message: String },

    #[error("step timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("execution cancelled")]
    Cancelled,

    #[error("unknown post-processing rule '{rule}'")]
    UnknownPostProcessingRule { rule: String },

    #[error("invalid parameter format: {message}")]
    InvalidParameterFormat { message: String },

    #[error("no handler registered for task type {task_type}")]
    UnknownHandler { task_type: TaskType },

    #[error("no pricing configured for model '{model_id}'; cost is unknown")]
    EstimationUnavailable { model_id: String },
}

impl ExecutionError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderInvocation {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameterFormat {
            message: message.into(),
        }
    }

    /// Missing predecessor, unknown variable or failed retrieval
    pub fn is_input_resolution(&self) -> bool {
        matches!(
            self,
            Self::MissingPredecessorOutput { .. }
                | Self::UnknownVariableReference { .. }
                | Self::RetrievalFailed { .. }
        )
    }

    /// Provider-side failures, timeouts included
    pub fn is_provider_invocation(&self) -> bool {
        matches!(self, Self::ProviderInvocation { .. } | Self::Timeout { .. })
    }

    /// Stable machine-readable category
    pub fn kind(&self) -> &'static str {
        match self {
            _ if self.is_input_resolution() => "input_resolution",
            _ if self.is_provider_invocation() => "provider_invocation",
            Self::Cancelled => "cancelled",
            Self::UnknownPostProcessingRule { .. } => "unknown_post_processing_rule",
            Self::InvalidParameterFormat { .. } => "invalid_parameter_format",
            Self::UnknownHandler { .. } => "unknown_handler",
            Self::EstimationUnavailable { .. } => "estimation_unavailable",
            _ => "execution",
        }
    }
}

impl From<DomainError> for ExecutionError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Provider { provider, message } => {
                Self::ProviderInvocation { provider, message }
            }
            DomainError::KnowledgeBase(message) => Self::RetrievalFailed { message },
            other => Self::ProviderInvocation {
                provider: "unknown".to_string(),
                message: other.to_string(),
            },
        }
    }
}
