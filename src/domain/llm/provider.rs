use async_trait::async_trait;
use futures::Stream;
use std::fmt::Debug;
use std::pin::Pin;

use super::response::StreamChunk;
use super::{LlmRequest, LlmResponse};
use crate::domain::DomainError;

/// Stream type for incremental provider output
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, DomainError>> + Send>>;

/// Provider adapter: executes one task over a text with a given model
///
/// Rate limiting against the upstream service is the adapter's concern.
#[async_trait]
pub trait LlmProvider: Send + Sync + Debug {
    /// Run the task and return the complete output
    async fn chat(&self, model: &str, request: LlmRequest) -> Result<LlmResponse, DomainError>;

    /// Run the task and return the output as a stream of text chunks
    async fn chat_stream(&self, model: &str, request: LlmRequest)
        -> Result<LlmStream, DomainError>;

    /// Get the provider name
    fn provider_name(&self) -> &'static str;
}
