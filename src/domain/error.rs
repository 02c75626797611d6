use thiserror::Error;

/// Core domain errors raised by collaborators and services
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Knowledge base error: {0}")]
    KnowledgeBase(String),
}

impl DomainError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn knowledge_base(message: impl Into<String>) -> Self {
        Self::KnowledgeBase(message.into())
    }

    /// Whether the error originates from an upstream provider call
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::not_found("chain 7");
        assert_eq!(err.to_string(), "Not found: chain 7");

        let err = DomainError::provider("openai", "rate limited");
        assert_eq!(err.to_string(), "Provider error: openai - rate limited");
        assert!(err.is_provider());
    }

    #[test]
    fn test_knowledge_base_error() {
        let err = DomainError::knowledge_base("index offline");
        assert_eq!(err.to_string(), "Knowledge base error: index offline");
        assert!(!err.is_provider());
    }
}
