//! LLM provider adapter contract
//!
//! The engine only depends on the [`LlmProvider`] trait; concrete HTTP
//! adapters live in `infrastructure::llm`.

mod provider;
mod provider_resolver;
mod request;
mod response;

pub use provider::{LlmProvider, LlmStream};
pub use provider_resolver::{ProviderResolver, StaticProviderResolver};
pub use request::{LlmRequest, LlmRequestBuilder};
pub use response::{FinishReason, LlmResponse, StreamChunk, Usage};

#[cfg(test)]
pub use provider::mock::MockLlmProvider;
