//! Rule chain domain - chain definitions, parameters and validation

mod entity;
mod parameter;
mod repository;
mod validation;

pub use entity::{
    ChainId, ChainStepEntry, ErrorPolicy, GenerationConstraints, InputSource, RuleChain,
    RuleStep, RuleTemplate, ScopeId, StepSource, TaskType, TemplateId,
};
pub use parameter::{parse_parameters, ParameterError, StepParameter};
pub use repository::{ChainRepository, TargetTextRepository, TemplateRepository};
pub use validation::{
    ChainValidationError, ChainValidator, ExecutionPlan, PlannedStep, RESERVED_VARIABLES,
};

#[cfg(test)]
pub use repository::mock;
