//! Step handlers: one per task type, looked up through a registry

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use super::resolver::ResolvedInput;
use super::ExecutionError;
use crate::domain::chain::{RuleStep, TaskType};
use crate::domain::llm::LlmRequest;

/// What a handler wants done with a step's input
#[derive(Debug, Clone, PartialEq)]
pub enum StepPlan {
    /// Send this request to the step's model
    Llm(LlmRequest),
    /// Deterministic result computed locally
    Local(String),
}

/// Turns a step and its resolved input into a provider request or a local result
pub trait StepHandler: Send + Sync + Debug {
    fn task_type(&self) -> TaskType;

    /// Whether the step needs a configured model
    fn requires_model(&self) -> bool {
        true
    }

    fn prepare(&self, step: &RuleStep, input: &ResolvedInput) -> Result<StepPlan, ExecutionError>;
}

/// Handler for prompt-driven LLM tasks
///
/// `{name}` placeholders in the prompt are filled from the step parameter
/// of the same name, which then becomes required.
#[derive(Debug, Clone)]
pub struct LlmTaskHandler {
    task_type: TaskType,
    prompt: &'static str,
    required: &'static [&'static str],
    requires_instruction: bool,
}

impl LlmTaskHandler {
    pub const fn new(task_type: TaskType, prompt: &'static str) -> Self {
        Self {
            task_type,
            prompt,
            required: &[],
            requires_instruction: false,
        }
    }

    pub const fn with_required(mut self, required: &'static [&'static str]) -> Self {
        self.required = required;
        self
    }

    pub const fn with_required_instruction(mut self) -> Self {
        self.requires_instruction = true;
        self
    }

    fn task_prompt(&self, step: &RuleStep) -> Result<String, ExecutionError> {
        let mut prompt = self.prompt.to_string();
        for name in self.required {
            let value = step
                .parameter(name)
                .map(|p| p.render())
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    ExecutionError::invalid_parameter(format!(
                        "{} requires parameter '{}'",
                        self.task_type, name
                    ))
                })?;
            prompt = prompt.replace(&format!("{{{}}}", name), &value);
        }
        Ok(prompt)
    }
}

impl StepHandler for LlmTaskHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn prepare(&self, step: &RuleStep, input: &ResolvedInput) -> Result<StepPlan, ExecutionError> {
        let mut parts: Vec<String> = Vec::new();

        let prompt = self.task_prompt(step)?;
        if !prompt.is_empty() {
            parts.push(prompt);
        }

        // Retrieval inputs already carry the instruction next to their context
        if !input.includes_instruction {
            match step.instruction() {
                Some(instruction) => parts.push(instruction.trim().to_string()),
                None if self.requires_instruction => {
                    return Err(ExecutionError::invalid_parameter(format!(
                        "{} requires an 'instruction' parameter",
                        self.task_type
                    )));
                }
                None => {}
            }
        }

        let constraints = step.generation_constraints();
        if !constraints.style_hints.is_empty() {
            parts.push(format!("Style: {}.", constraints.style_hints.join(", ")));
        }
        if let Some(language) = &constraints.language {
            parts.push(format!("Respond in {}.", language));
        }

        let overrides = step.llm_overrides();
        let mut builder = LlmRequest::builder(self.task_type, input.text.clone())
            .parameters(step.rendered_parameters())
            .temperature(overrides.temperature)
            .top_p(overrides.top_p)
            .stop(overrides.stop.clone());

        if !parts.is_empty() {
            builder = builder.instruction(parts.join("\n"));
        }

        Ok(StepPlan::Llm(builder.build()))
    }
}

/// Hands the input straight to post-processing
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughHandler;

impl StepHandler for PassthroughHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Passthrough
    }

    fn requires_model(&self) -> bool {
        false
    }

    fn prepare(&self, _step: &RuleStep, input: &ResolvedInput) -> Result<StepPlan, ExecutionError> {
        Ok(StepPlan::Local(input.text.clone()))
    }
}

/// Counts Unicode words in the input
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCountHandler;

impl StepHandler for WordCountHandler {
    fn task_type(&self) -> TaskType {
        TaskType::WordCount
    }

    fn requires_model(&self) -> bool {
        false
    }

    fn prepare(&self, _step: &RuleStep, input: &ResolvedInput) -> Result<StepPlan, ExecutionError> {
        Ok(StepPlan::Local(input.text.unicode_words().count().to_string()))
    }
}

const BUILT_IN_TASKS: [LlmTaskHandler; 10] = [
    LlmTaskHandler::new(
        TaskType::Summarize,
        "Summarize the following text, keeping names and key events.",
    ),
    LlmTaskHandler::new(
        TaskType::Expand,
        "Expand the following text with more detail while keeping its voice.",
    ),
    LlmTaskHandler::new(TaskType::Rewrite, "Rewrite the following text."),
    LlmTaskHandler::new(
        TaskType::Polish,
        "Polish the following text: fix grammar and improve flow without changing the meaning.",
    ),
    LlmTaskHandler::new(
        TaskType::Continue,
        "Continue the following text in the same style.",
    ),
    LlmTaskHandler::new(
        TaskType::Translate,
        "Translate the following text into {target_language}.",
    )
    .with_required(&["target_language"]),
    LlmTaskHandler::new(
        TaskType::ExtractCharacters,
        "List the characters that appear in the following text, \
         one per line with a short description.",
    ),
    LlmTaskHandler::new(
        TaskType::ExtractEvents,
        "List the events in the following text in chronological order, one per line.",
    ),
    LlmTaskHandler::new(
        TaskType::AnalyzeConflicts,
        "Identify the conflicts between characters in the following text and explain each briefly.",
    ),
    LlmTaskHandler::new(TaskType::CustomInstruction, "").with_required_instruction(),
];

/// Handlers keyed by task type
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in task kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for handler in BUILT_IN_TASKS {
            registry.register(Arc::new(handler));
        }
        registry.register(Arc::new(PassthroughHandler));
        registry.register(Arc::new(WordCountHandler));
        registry
    }

    /// Register a handler, replacing any existing one for its task type
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.task_type(), handler);
    }

    pub fn get(&self, task_type: TaskType) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(&task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
