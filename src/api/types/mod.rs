//! Request and response types of the HTTP surface

pub mod chain;
pub mod error;
pub mod json;

pub use chain::{BatchRequest, ChainSummary, ExecuteChainBody};
pub use error::{ApiError, ApiErrorResponse};
pub use json::Json;
