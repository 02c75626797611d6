//! LLM override parameters carried by chains and steps

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest completion budget a step may request
pub const MAX_COMPLETION_TOKENS: u32 = 200_000;

/// Generation overrides; step-level values win over chain-level ones
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmOverrideParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// Override validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValidationError {
    InvalidTemperature { value: f32, min: f32, max: f32 },
    InvalidTopP { value: f32, min: f32, max: f32 },
    InvalidMaxTokens,
}

impl fmt::Display for OverrideValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTemperature { value, min, max } => write!(
                f,
                "Invalid temperature {}: must be between {} and {}",
                value, min, max
            ),
            Self::InvalidTopP { value, min, max } => write!(
                f,
                "Invalid top_p {}: must be between {} and {}",
                value, min, max
            ),
            Self::InvalidMaxTokens => write!(
                f,
                "max_tokens must be between 1 and {}",
                MAX_COMPLETION_TOKENS
            ),
        }
    }
}

impl std::error::Error for OverrideValidationError {}

impl LlmOverrideParameters {
    /// Layer `self` over `base`: any value set here replaces the base value
    pub fn merged_over(&self, base: &LlmOverrideParameters) -> LlmOverrideParameters {
        LlmOverrideParameters {
            temperature: self.temperature.or(base.temperature),
            top_p: self.top_p.or(base.top_p),
            max_tokens: self.max_tokens.or(base.max_tokens),
            stop: self.stop.clone().or_else(|| base.stop.clone()),
        }
    }

    pub fn validate(&self) -> Result<(), OverrideValidationError> {
        if let Some(value) = self.temperature {
            if !(0.0..=2.0).contains(&value) {
                return Err(OverrideValidationError::InvalidTemperature {
                    value,
                    min: 0.0,
                    max: 2.0,
                });
            }
        }

        if let Some(value) = self.top_p {
            if !(0.0..=1.0).contains(&value) {
                return Err(OverrideValidationError::InvalidTopP {
                    value,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }

        if matches!(self.max_tokens, Some(0)) || self.max_tokens > Some(MAX_COMPLETION_TOKENS) {
            return Err(OverrideValidationError::InvalidMaxTokens);
        }

        Ok(())
    }
}
