use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::http_client::HttpClientTrait;
use crate::domain::llm::{
    FinishReason, LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamChunk, Usage,
};
use crate::domain::DomainError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Adapter for any endpoint speaking the OpenAI chat completions protocol
///
/// The step instruction becomes the system message and the step input the
/// user message.
#[derive(Debug)]
pub struct OpenAiCompatibleProvider<C: HttpClientTrait> {
    client: C,
    auth_header: Option<String>,
    base_url: String,
}

impl<C: HttpClientTrait> OpenAiCompatibleProvider<C> {
    pub fn new(client: C, api_key: Option<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: C, api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            auth_header: api_key
                .filter(|key| !key.is_empty())
                .map(|key| format!("Bearer {}", key)),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        let mut headers = vec![("Content-Type", "application/json")];
        if let Some(auth) = &self.auth_header {
            headers.push(("Authorization", auth.as_str()));
        }
        headers
    }

    fn build_request(&self, model: &str, request: &LlmRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(instruction) = request.instruction.as_deref().filter(|i| !i.is_empty()) {
            messages.push(ChatMessage {
                role: "system",
                content: instruction,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.input,
        });

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": request.stream,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = serde_json::json!(stop);
        }
        if request.stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }

        body
    }

    fn parse_response(json: serde_json::Value) -> Result<LlmResponse, DomainError> {
        let response: ChatResponse = serde_json::from_value(json).map_err(|e| {
            DomainError::provider("openai", format!("Failed to parse response: {}", e))
        })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::provider("openai", "No choices in response"))?;

        let mut parsed = LlmResponse::new(
            response.id,
            response.model,
            choice.message.content.unwrap_or_default(),
        );

        if let Some(reason) = choice.finish_reason {
            parsed = parsed.with_finish_reason(parse_finish_reason(&reason));
        }
        if let Some(usage) = response.usage {
            let usage = Usage::new(usage.prompt_tokens, usage.completion_tokens);
            parsed = parsed.with_usage(usage);
        }

        Ok(parsed)
    }
}

#[async_trait]
impl<C: HttpClientTrait> LlmProvider for OpenAiCompatibleProvider<C> {
    async fn chat(&self, model: &str, request: LlmRequest) -> Result<LlmResponse, DomainError> {
        let mut request = request;
        request.stream = false;

        let body = self.build_request(model, &request);
        let response = self
            .client
            .post_json(&self.chat_completions_url(), self.headers(), &body)
            .await?;

        Self::parse_response(response)
    }

    async fn chat_stream(
        &self,
        model: &str,
        request: LlmRequest,
    ) -> Result<LlmStream, DomainError> {
        let mut request = request;
        request.stream = true;

        let body = self.build_request(model, &request);
        let pieces = self
            .client
            .post_json_stream(&self.chat_completions_url(), self.headers(), &body)
            .await?;

        // `None` marks the end of the body so a final unterminated line is not lost
        let chunks = pieces
            .map(Some)
            .chain(stream::once(future::ready(None)))
            .scan(SseDecoder::default(), |decoder, piece| {
                let decoded = match piece {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    Some(Err(e)) => vec![Err(e)],
                    None => decoder.finish().into_iter().collect(),
                };
                future::ready(Some(stream::iter(decoded)))
            })
            .flatten();

        Ok(Box::pin(chunks))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Splits a server-sent-event body into chunks, across arbitrary piece boundaries
#[derive(Debug, Default)]
struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, DomainError>> {
        self.pending.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(chunk) = parse_sse_line(line.trim_end()) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Parse whatever is left once the body has ended
    fn finish(&mut self) -> Option<Result<StreamChunk, DomainError>> {
        let rest = std::mem::take(&mut self.pending);
        parse_sse_line(String::from_utf8_lossy(&rest).trim_end())
    }
}

fn parse_sse_line(line: &str) -> Option<Result<StreamChunk, DomainError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamChunk::finished(FinishReason::Stop)));
    }

    let event: StreamEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            return Some(Err(DomainError::provider(
                "openai",
                format!("Invalid stream chunk: {}", e),
            )));
        }
    };

    let mut chunk = StreamChunk::default();
    if let Some(choice) = event.choices.into_iter().next() {
        chunk.delta = choice.delta.content.filter(|c| !c.is_empty());
        chunk.finish_reason = choice.finish_reason.as_deref().map(parse_finish_reason);
    }
    if let Some(usage) = event.usage {
        chunk = chunk.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
    }
    Some(Ok(chunk))
}

fn parse_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "error" => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    id: String,
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
