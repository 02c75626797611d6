//! Chain validation: turns a stored chain into an execution plan

use std::collections::{HashMap, HashSet};

use super::entity::{
    ChainId, InputSource, RuleChain, RuleStep, RuleTemplate, ScopeId, StepSource, TaskType,
    TemplateId,
};
use super::parameter::ParameterError;
use crate::domain::execution::HandlerRegistry;
use crate::domain::model::{ModelRegistry, OverrideValidationError, MAX_COMPLETION_TOKENS};
use crate::domain::postprocess::PostProcessorRegistry;

/// Variable names owned by the execution context
pub const RESERVED_VARIABLES: [&str; 2] = ["original", "previous"];

/// Reasons a chain cannot be planned
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChainValidationError {
    #[error("chain {0} has no steps")]
    EmptyChain(ChainId),

    #[error("step order must be dense and zero-based; expected {expected}, found {found}")]
    InvalidOrder { expected: u32, found: u32 },

    #[error("step {order} references unknown template {template_id}")]
    UnknownTemplate { order: u32, template_id: TemplateId },

    #[error("step {order} uses task type {task_type}, which has no handler")]
    UnknownTaskType { order: u32, task_type: TaskType },

    #[error("step {order} requires a model but none is configured")]
    MissingModel { order: u32 },

    #[error("step {order} references unknown model '{model_id}'")]
    UnknownModel { order: u32, model_id: String },

    #[error("step {order} declares output variable '{name}' more than once")]
    DuplicateVariable { order: u32, name: String },

    #[error("step {order} uses reserved variable name '{name}'")]
    ReservedVariable { order: u32, name: String },

    #[error("step {order} references '{reference}', which no earlier step declares")]
    UnresolvedReference { order: u32, reference: String },

    #[error("step {order} references unknown post-processing rule '{rule}'")]
    UnknownPostProcessingRule { order: u32, rule: String },

    #[error("step {order}: {source}")]
    InvalidParameter { order: u32, source: ParameterError },

    #[error("step {order}: {message}")]
    InvalidOverrides { order: u32, message: String },

    #[error("step {order}: retrieval top_n must be at least 1")]
    InvalidTopN { order: u32 },

    #[error("step {order}: max_length {max_length} is outside the supported completion budget")]
    InvalidMaxLength { order: u32, max_length: u32 },
}

/// A step ready for execution: templates resolved and overrides merged
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub order: u32,
    pub step: RuleStep,
    pub template_id: Option<TemplateId>,
}

/// The immutable snapshot the executor runs
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub novel_scope: Option<ScopeId>,
    pub steps: Vec<PlannedStep>,
}

impl ExecutionPlan {
    /// Build a plan from already-resolved steps, numbering them in order
    pub fn new(chain_id: ChainId, chain_name: impl Into<String>, steps: Vec<RuleStep>) -> Self {
        Self {
            chain_id,
            chain_name: chain_name.into(),
            novel_scope: None,
            steps: steps
                .into_iter()
                .enumerate()
                .map(|(i, step)| PlannedStep {
                    order: i as u32,
                    step,
                    template_id: None,
                })
                .collect(),
        }
    }

    pub fn with_novel_scope(mut self, scope: ScopeId) -> Self {
        self.novel_scope = Some(scope);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Checks chains against the configured models, rules and handlers
#[derive(Debug, Clone, Copy)]
pub struct ChainValidator<'a> {
    models: &'a ModelRegistry,
    rules: &'a PostProcessorRegistry,
    handlers: &'a HandlerRegistry,
}

impl<'a> ChainValidator<'a> {
    pub fn new(
        models: &'a ModelRegistry,
        rules: &'a PostProcessorRegistry,
        handlers: &'a HandlerRegistry,
    ) -> Self {
        Self {
            models,
            rules,
            handlers,
        }
    }

    /// Validate a chain and produce its execution plan
    pub fn validate(
        &self,
        chain: &RuleChain,
        templates: &HashMap<TemplateId, RuleTemplate>,
    ) -> Result<ExecutionPlan, ChainValidationError> {
        if chain.is_empty() {
            return Err(ChainValidationError::EmptyChain(chain.id()));
        }

        let mut entries: Vec<_> = chain.steps().iter().collect();
        entries.sort_by_key(|entry| entry.order);

        let mut declared: HashSet<String> = HashSet::new();
        let mut steps = Vec::with_capacity(entries.len());

        for (expected, entry) in entries.into_iter().enumerate() {
            let expected = expected as u32;
            if entry.order != expected {
                return Err(ChainValidationError::InvalidOrder {
                    expected,
                    found: entry.order,
                });
            }
            let order = entry.order;

            let (step, template_id) = resolve_source(order, &entry.source, templates)?;
            let step = step.clone().with_llm_overrides(
                step.llm_overrides().merged_over(chain.global_overrides()),
            );

            self.check_step(order, &step, &declared)?;

            if let Some(name) = step.output_variable_name() {
                if RESERVED_VARIABLES.contains(&name) {
                    return Err(ChainValidationError::ReservedVariable {
                        order,
                        name: name.to_string(),
                    });
                }
                if !declared.insert(name.to_string()) {
                    return Err(ChainValidationError::DuplicateVariable {
                        order,
                        name: name.to_string(),
                    });
                }
            }

            steps.push(PlannedStep {
                order,
                step,
                template_id,
            });
        }

        Ok(ExecutionPlan {
            chain_id: chain.id(),
            chain_name: chain.name().to_string(),
            novel_scope: chain.novel_scope(),
            steps,
        })
    }

    fn check_step(
        &self,
        order: u32,
        step: &RuleStep,
        declared: &HashSet<String>,
    ) -> Result<(), ChainValidationError> {
        let task_type = step.task_type();
        let handler = match task_type {
            TaskType::ChainExecutionFailure => None,
            _ => self.handlers.get(task_type),
        }
        .ok_or(ChainValidationError::UnknownTaskType { order, task_type })?;

        if handler.requires_model() {
            if step.model_id().is_empty() {
                return Err(ChainValidationError::MissingModel { order });
            }
            if !self.models.contains(step.model_id()) {
                return Err(ChainValidationError::UnknownModel {
                    order,
                    model_id: step.model_id().to_string(),
                });
            }
        }

        match step.input_source() {
            InputSource::NamedStep { reference } if !declared.contains(reference) => {
                return Err(ChainValidationError::UnresolvedReference {
                    order,
                    reference: reference.clone(),
                });
            }
            InputSource::RagRetrieval { top_n: Some(0), .. } => {
                return Err(ChainValidationError::InvalidTopN { order });
            }
            _ => {}
        }

        for (name, parameter) in step.parameters() {
            parameter
                .check(name, self.models)
                .map_err(|source| ChainValidationError::InvalidParameter { order, source })?;
        }

        if let Some(max_length) = step.generation_constraints().max_length {
            if max_length == 0 || max_length > MAX_COMPLETION_TOKENS {
                return Err(ChainValidationError::InvalidMaxLength { order, max_length });
            }
        }

        step.llm_overrides()
            .validate()
            .map_err(|e: OverrideValidationError| ChainValidationError::InvalidOverrides {
                order,
                message: e.to_string(),
            })?;

        if let Some(rule) = step
            .post_processing_rules()
            .iter()
            .find(|rule| !self.rules.is_known(rule))
        {
            return Err(ChainValidationError::UnknownPostProcessingRule {
                order,
                rule: rule.clone(),
            });
        }

        Ok(())
    }
}

fn resolve_source<'t>(
    order: u32,
    source: &'t StepSource,
    templates: &'t HashMap<TemplateId, RuleTemplate>,
) -> Result<(RuleStep, Option<TemplateId>), ChainValidationError> {
    match source {
        StepSource::Private { step } => Ok((step.clone(), None)),
        StepSource::Template {
            template_id,
            input_source,
            output_variable_name,
            error_policy,
        } => {
            let template = templates
                .get(template_id)
                .ok_or(ChainValidationError::UnknownTemplate {
                    order,
                    template_id: *template_id,
                })?;

            let mut step = template.step.clone();
            if let Some(source) = input_source {
                step = step.with_input_source(source.clone());
            }
            if let Some(name) = output_variable_name {
                step = step.with_output_variable(name.clone());
            }
            if let Some(policy) = error_policy {
                step = step.with_error_policy(*policy);
            }
            Ok((step, Some(*template_id)))
        }
    }
}
