//! Read-only model registry built from engine configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A configured model: provider tag, pricing and completion defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEntry {
    pub id: String,
    /// Provider tag used for routing and for the provider-level token factor
    pub provider: String,
    /// Price in USD per million input tokens; absent means unknown
    #[serde(default)]
    pub input_price_per_million: Option<f64>,
    /// Price in USD per million output tokens; absent means the input price applies
    #[serde(default)]
    pub output_price_per_million: Option<f64>,
    /// Default completion budget when a step declares no max length
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            input_price_per_million: None,
            output_price_per_million: None,
            max_completion_tokens: None,
        }
    }

    pub fn with_pricing(mut self, input_per_million: f64, output_per_million: f64) -> Self {
        self.input_price_per_million = Some(input_per_million);
        self.output_price_per_million = Some(output_per_million);
        self
    }

    pub fn with_max_completion_tokens(mut self, tokens: u32) -> Self {
        self.max_completion_tokens = Some(tokens);
        self
    }
}

/// Lookup table of configured models, keyed by model ID
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelEntry>,
}

impl ModelRegistry {
    pub fn new(entries: impl IntoIterator<Item = ModelEntry>) -> Self {
        Self {
            models: entries
                .into_iter()
                .map(|entry| (entry.id.clone(), entry))
                .collect(),
        }
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelEntry> {
        self.models.get(model_id)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    pub fn provider_of(&self, model_id: &str) -> Option<&str> {
        self.models.get(model_id).map(|m| m.provider.as_str())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
