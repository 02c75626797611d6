//! LLM provider adapters

mod http_client;
mod openai;
mod router;

pub use http_client::{ByteStream, HttpClient, HttpClientTrait};
pub use openai::OpenAiCompatibleProvider;
pub use router::ProviderRouter;
