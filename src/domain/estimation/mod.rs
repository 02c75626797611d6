//! Token and cost estimation

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::model::ModelRegistry;

/// Default characters-per-token ratio for mixed-language prose
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 2.5;

/// Character-to-token ratios, most specific first: model, then provider, then default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub default_chars_per_token: f64,
    pub provider_factors: HashMap<String, f64>,
    pub model_factors: HashMap<String, f64>,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            default_chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            provider_factors: HashMap::new(),
            model_factors: HashMap::new(),
        }
    }
}

/// Upper token bounds for the LOW and MEDIUM cost levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostLevelThresholds {
    pub low_max_tokens: u64,
    pub medium_max_tokens: u64,
}

impl Default for CostLevelThresholds {
    fn default() -> Self {
        Self {
            low_max_tokens: 8_000,
            medium_max_tokens: 32_000,
        }
    }
}

/// Coarse classification of an estimated run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl fmt::Display for CostLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Monetary estimate; unknown when any contributing model lacks pricing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CostEstimate {
    Known { usd: f64 },
    Unknown,
}

impl CostEstimate {
    pub fn zero() -> Self {
        Self::Known { usd: 0.0 }
    }

    pub fn usd(&self) -> Option<f64> {
        match self {
            Self::Known { usd } => Some(*usd),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known { .. })
    }

    /// Sum two estimates; an unknown operand makes the sum unknown
    pub fn add(self, other: CostEstimate) -> CostEstimate {
        match (self, other) {
            (Self::Known { usd: a }, Self::Known { usd: b }) => Self::Known { usd: a + b },
            _ => Self::Unknown,
        }
    }
}

impl Default for CostEstimate {
    fn default() -> Self {
        Self::zero()
    }
}

/// Converts text into token estimates and token counts into costs
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    config: EstimationConfig,
    thresholds: CostLevelThresholds,
    models: Arc<ModelRegistry>,
}

impl TokenEstimator {
    pub fn new(config: EstimationConfig, models: Arc<ModelRegistry>) -> Self {
        Self {
            config,
            thresholds: CostLevelThresholds::default(),
            models,
        }
    }

    pub fn with_thresholds(mut self, thresholds: CostLevelThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Characters per token for a model
    pub fn chars_per_token(&self, model_id: &str) -> f64 {
        let by_model = self.config.model_factors.get(model_id).copied();
        let by_provider = || {
            self.models
                .provider_of(model_id)
                .and_then(|provider| self.config.provider_factors.get(provider).copied())
        };

        let usable = |factor: &f64| factor.is_finite() && *factor > 0.0;

        by_model
            .filter(usable)
            .or_else(|| by_provider().filter(usable))
            .unwrap_or_else(|| self.default_factor())
    }

    fn default_factor(&self) -> f64 {
        let factor = self.config.default_chars_per_token;
        if factor.is_finite() && factor > 0.0 {
            factor
        } else {
            DEFAULT_CHARS_PER_TOKEN
        }
    }

    /// Estimated tokens for a text sent to the given model
    pub fn estimate(&self, text: &str, model_id: &str) -> u64 {
        self.estimate_chars(text.chars().count(), model_id)
    }

    /// Estimated tokens for a text of `chars` characters
    pub fn estimate_chars(&self, chars: usize, model_id: &str) -> u64 {
        if chars == 0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token(model_id)).ceil() as u64
    }

    /// Cost of a call; unknown only when the model has no input price
    ///
    /// Output tokens are billed at the input price when no output price is set.
    pub fn cost(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> CostEstimate {
        let Some(model) = self.models.get(model_id) else {
            return CostEstimate::Unknown;
        };
        let Some(input_price) = model.input_price_per_million else {
            return CostEstimate::Unknown;
        };
        let output_price = model.output_price_per_million.unwrap_or(input_price);

        CostEstimate::Known {
            usd: (input_tokens as f64 * input_price + output_tokens as f64 * output_price)
                / 1_000_000.0,
        }
    }

    /// Classify a token total; `None` means nothing could be estimated
    pub fn classify(&self, total_tokens: Option<u64>) -> CostLevel {
        match total_tokens {
            None => CostLevel::Unknown,
            Some(total) if total <= self.thresholds.low_max_tokens => CostLevel::Low,
            Some(total) if total <= self.thresholds.medium_max_tokens => CostLevel::Medium,
            Some(_) => CostLevel::High,
        }
    }
}
