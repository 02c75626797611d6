//! Rule chain entity and related types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::parameter::StepParameter;
use crate::domain::model::LlmOverrideParameters;
use crate::domain::rag::ContextPlacement;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Rule chain identifier
    ChainId
);
numeric_id!(
    /// Reusable rule template identifier
    TemplateId
);
numeric_id!(
    /// Target scope (a novel) that chains, texts and vector queries belong to
    ScopeId
);

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Summarize,
    Expand,
    Rewrite,
    Polish,
    Continue,
    Translate,
    ExtractCharacters,
    ExtractEvents,
    AnalyzeConflicts,
    CustomInstruction,
    /// Deterministic: the input goes straight to post-processing
    Passthrough,
    /// Deterministic: counts words in the input
    WordCount,
    /// Synthetic marker for the record appended when a chain aborts
    ChainExecutionFailure,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "SUMMARIZE",
            Self::Expand => "EXPAND",
            Self::Rewrite => "REWRITE",
            Self::Polish => "POLISH",
            Self::Continue => "CONTINUE",
            Self::Translate => "TRANSLATE",
            Self::ExtractCharacters => "EXTRACT_CHARACTERS",
            Self::ExtractEvents => "EXTRACT_EVENTS",
            Self::AnalyzeConflicts => "ANALYZE_CONFLICTS",
            Self::CustomInstruction => "CUSTOM_INSTRUCTION",
            Self::Passthrough => "PASSTHROUGH",
            Self::WordCount => "WORD_COUNT",
            Self::ChainExecutionFailure => "CHAIN_EXECUTION_FAILURE",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a step takes its input from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputSource {
    /// The chain's initial input, unchanged
    OriginalText,
    /// The processed output of the most recently completed step
    PreviousStep,
    /// The output registered under an earlier step's output variable
    NamedStep { reference: String },
    /// Similarity-search context combined with the step instruction
    RagRetrieval {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_n: Option<u32>,
        /// Query text; defaults to the step instruction
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placement: Option<ContextPlacement>,
    },
}

impl InputSource {
    pub fn named(reference: impl Into<String>) -> Self {
        Self::NamedStep {
            reference: reference.into(),
        }
    }

    pub fn rag(top_n: u32) -> Self {
        Self::RagRetrieval {
            top_n: Some(top_n),
            query: None,
            placement: None,
        }
    }

    /// Whether the input only exists once earlier steps have run
    pub fn is_data_dependent(&self) -> bool {
        matches!(self, Self::PreviousStep | Self::NamedStep { .. })
    }
}

/// What to do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the chain and report the failure
    #[default]
    Abort,
    /// Mark the step skipped and move on
    Continue,
}

/// Constraints on what a step may generate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConstraints {
    /// Completion budget in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub style_hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A single executable step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStep {
    task_type: TaskType,
    input_source: InputSource,
    #[serde(default)]
    parameters: BTreeMap<String, StepParameter>,
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    llm_overrides: LlmOverrideParameters,
    #[serde(default)]
    generation_constraints: GenerationConstraints,
    #[serde(default)]
    post_processing_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_variable_name: Option<String>,
    #[serde(default)]
    error_policy: ErrorPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

impl RuleStep {
    pub fn new(
        task_type: TaskType,
        input_source: InputSource,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            task_type,
            input_source,
            parameters: BTreeMap::new(),
            model_id: model_id.into(),
            llm_overrides: LlmOverrideParameters::default(),
            generation_constraints: GenerationConstraints::default(),
            post_processing_rules: Vec::new(),
            output_variable_name: None,
            error_policy: ErrorPolicy::default(),
            timeout_ms: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: StepParameter) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_instruction(self, instruction: impl Into<String>) -> Self {
        self.with_parameter("instruction", StepParameter::text(instruction))
    }

    pub fn with_llm_overrides(mut self, overrides: LlmOverrideParameters) -> Self {
        self.llm_overrides = overrides;
        self
    }

    pub fn with_generation_constraints(mut self, constraints: GenerationConstraints) -> Self {
        self.generation_constraints = constraints;
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.generation_constraints.max_length = Some(max_length);
        self
    }

    pub fn with_post_processing(mut self, rules: Vec<String>) -> Self {
        self.post_processing_rules = rules;
        self
    }

    pub fn with_output_variable(mut self, name: impl Into<String>) -> Self {
        self.output_variable_name = Some(name.into());
        self
    }

    pub fn with_input_source(mut self, source: InputSource) -> Self {
        self.input_source = source;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    // Getters

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn input_source(&self) -> &InputSource {
        &self.input_source
    }

    pub fn parameters(&self) -> &BTreeMap<String, StepParameter> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&StepParameter> {
        self.parameters.get(name)
    }

    /// Text of the `instruction` parameter, if set
    pub fn instruction(&self) -> Option<&str> {
        self.parameter("instruction").and_then(StepParameter::as_text)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn llm_overrides(&self) -> &LlmOverrideParameters {
        &self.llm_overrides
    }

    pub fn generation_constraints(&self) -> &GenerationConstraints {
        &self.generation_constraints
    }

    pub fn post_processing_rules(&self) -> &[String] {
        &self.post_processing_rules
    }

    pub fn output_variable_name(&self) -> Option<&str> {
        self.output_variable_name.as_deref()
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    /// Rendered parameter values passed along to the provider
    pub fn rendered_parameters(&self) -> BTreeMap<String, String> {
        self.parameters
            .iter()
            .map(|(name, value)| (name.clone(), value.render()))
            .collect()
    }
}

/// A reusable step definition shared between chains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTemplate {
    pub id: TemplateId,
    pub name: String,
    pub step: RuleStep,
}

impl RuleTemplate {
    pub fn new(id: TemplateId, name: impl Into<String>, step: RuleStep) -> Self {
        Self {
            id,
            name: name.into(),
            step,
        }
    }
}

/// How a chain position obtains its step definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum StepSource {
    /// A step defined inline, private to this chain
    Private { step: RuleStep },
    /// A reference to a template, with optional per-chain wiring overrides
    Template {
        template_id: TemplateId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_source: Option<InputSource>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_variable_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_policy: Option<ErrorPolicy>,
    },
}

/// One position in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStepEntry {
    pub order: u32,
    #[serde(flatten)]
    pub source: StepSource,
}

impl ChainStepEntry {
    pub fn private(order: u32, step: RuleStep) -> Self {
        Self {
            order,
            source: StepSource::Private { step },
        }
    }

    pub fn template(order: u32, template_id: TemplateId) -> Self {
        Self {
            order,
            source: StepSource::Template {
                template_id,
                input_source: None,
                output_variable_name: None,
                error_policy: None,
            },
        }
    }
}

/// Rule chain entity: an ordered sequence of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleChain {
    id: ChainId,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    novel_scope: Option<ScopeId>,
    #[serde(default)]
    global_overrides: LlmOverrideParameters,
    #[serde(default)]
    steps: Vec<ChainStepEntry>,
}

impl RuleChain {
    pub fn new(id: ChainId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            novel_scope: None,
            global_overrides: LlmOverrideParameters::default(),
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_novel_scope(mut self, scope: ScopeId) -> Self {
        self.novel_scope = Some(scope);
        self
    }

    pub fn with_global_overrides(mut self, overrides: LlmOverrideParameters) -> Self {
        self.global_overrides = overrides;
        self
    }

    /// Append a private step at the next order position
    pub fn with_step(mut self, step: RuleStep) -> Self {
        let order = self.steps.len() as u32;
        self.steps.push(ChainStepEntry::private(order, step));
        self
    }

    /// Append a template reference at the next order position
    pub fn with_template_step(mut self, template_id: TemplateId) -> Self {
        let order = self.steps.len() as u32;
        self.steps.push(ChainStepEntry::template(order, template_id));
        self
    }

    pub fn with_entry(mut self, entry: ChainStepEntry) -> Self {
        self.steps.push(entry);
        self
    }

    // Getters

    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn novel_scope(&self) -> Option<ScopeId> {
        self.novel_scope
    }

    pub fn global_overrides(&self) -> &LlmOverrideParameters {
        &self.global_overrides
    }

    pub fn steps(&self) -> &[ChainStepEntry] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// IDs of all templates this chain references
    pub fn template_ids(&self) -> Vec<TemplateId> {
        self.steps
            .iter()
            .filter_map(|entry| match entry.source {
                StepSource::Template { template_id, .. } => Some(template_id),
                StepSource::Private { .. } => None,
            })
            .collect()
    }
}
