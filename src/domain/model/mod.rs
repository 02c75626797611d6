//! Model registry and generation parameters

mod overrides;
mod registry;

pub use overrides::{LlmOverrideParameters, OverrideValidationError, MAX_COMPLETION_TOKENS};
pub use registry::{ModelEntry, ModelRegistry};
