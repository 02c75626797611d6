use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::chain::TaskType;

/// One provider call issued on behalf of a rule step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub task_type: TaskType,
    /// Instruction sent ahead of the input text, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Text the task operates on
    pub input: String,
    /// Rendered step parameters, available to provider-side prompt templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
}

impl LlmRequest {
    pub fn builder(task_type: TaskType, input: impl Into<String>) -> LlmRequestBuilder {
        LlmRequestBuilder::new(task_type, input)
    }

    /// Full prompt text as the provider will see it
    pub fn prompt_text(&self) -> String {
        match &self.instruction {
            Some(instruction) if !instruction.is_empty() => {
                format!("{}\n\n{}", instruction, self.input)
            }
            _ => self.input.clone(),
        }
    }
}

/// Builder for LlmRequest
#[derive(Debug)]
pub struct LlmRequestBuilder {
    request: LlmRequest,
}

impl LlmRequestBuilder {
    pub fn new(task_type: TaskType, input: impl Into<String>) -> Self {
        Self {
            request: LlmRequest {
                task_type,
                instruction: None,
                input: input.into(),
                parameters: BTreeMap::new(),
                temperature: None,
                max_tokens: None,
                top_p: None,
                stop: None,
                stream: false,
            },
        }
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.request.instruction = Some(instruction.into());
        self
    }

    pub fn parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.request.parameters = parameters;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.parameters.insert(name.into(), value.into());
        self
    }

    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.request.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.request.max_tokens = max_tokens;
        self
    }

    pub fn top_p(mut self, top_p: Option<f32>) -> Self {
        self.request.top_p = top_p;
        self
    }

    pub fn stop(mut self, stop: Option<Vec<String>>) -> Self {
        self.request.stop = stop;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.request.stream = stream;
        self
    }

    pub fn build(self) -> LlmRequest {
        self.request
    }
}
