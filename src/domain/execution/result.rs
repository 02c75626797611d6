use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use super::ExecutionError;
use crate::domain::chain::{ChainId, TaskType};
use crate::domain::estimation::{CostEstimate, CostLevel};

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

/// Overall outcome of a chain run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Completed,
    Aborted,
    Cancelled,
}

/// Tokens consumed by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// True when the provider reported no usage and the estimator filled in
    pub estimated: bool,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Dry-run estimate for one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEstimate {
    pub step_order: u32,
    pub task_type: TaskType,
    pub model_to_be_used: String,
    pub estimated_prompt_tokens: u64,
    pub max_completion_tokens: u64,
    pub estimated_cost: CostEstimate,
}

/// Record of one executed step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_order: u32,
    pub task_type: TaskType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model_id: String,
    pub input_snippet: String,
    pub output_snippet: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostEstimate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Full processed output, registered into the execution context
    #[serde(skip)]
    pub output: Option<String>,
    #[serde(skip)]
    pub failure: Option<ExecutionError>,
    #[serde(skip)]
    pub estimate: Option<StepEstimate>,
}

impl StepResult {
    pub fn new(step_order: u32, task_type: TaskType, status: StepStatus) -> Self {
        Self {
            step_order,
            task_type,
            model_id: String::new(),
            input_snippet: String::new(),
            output_snippet: String::new(),
            status,
            error: None,
            usage: None,
            cost: None,
            warnings: Vec::new(),
            output: None,
            failure: None,
            estimate: None,
        }
    }

    pub fn failed(step_order: u32, task_type: TaskType, error: ExecutionError) -> Self {
        Self::new(step_order, task_type, StepStatus::Failure).fail(error)
    }

    /// Mark this result failed, or cancelled when the error is a cancellation
    pub fn fail(mut self, error: ExecutionError) -> Self {
        self.status = match error {
            ExecutionError::Cancelled => StepStatus::Cancelled,
            _ => StepStatus::Failure,
        };
        self.error = Some(error.to_string());
        self.failure = Some(error);
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_input(mut self, input: &str, snippet_len: usize) -> Self {
        self.input_snippet = snippet(input, snippet_len);
        self
    }

    pub fn with_output(mut self, output: String, snippet_len: usize) -> Self {
        self.output_snippet = snippet(&output, snippet_len);
        self.output = Some(output);
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Marker used as output when this step ends the chain
    pub fn error_marker(&self) -> String {
        format!(
            "[step {} failed: {}]",
            self.step_order,
            self.error.as_deref().unwrap_or("unknown error")
        )
    }
}

/// Result of a full (non-dry) chain execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainExecutionResult {
    pub original_text: String,
    pub final_output_text: String,
    pub executed_chain_name: String,
    pub executed_chain_id: ChainId,
    pub status: ChainStatus,
    pub steps_results: Vec<StepResult>,
    pub total_cost: CostEstimate,
}

/// Pre-execution estimate of a chain run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DryRunEstimate {
    pub estimated_total_prompt_tokens: u64,
    pub estimated_total_completion_tokens: u64,
    pub token_cost_level: CostLevel,
    pub estimated_cost: CostEstimate,
    pub warnings: Vec<String>,
    pub steps_estimates: Vec<StepEstimate>,
}

/// Event emitted by a streaming execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChainEvent {
    /// Incremental text from the final step
    Delta { text: String },
    /// Terminal event; always the last one
    Completed { result: ChainExecutionResult },
}

/// First `max` grapheme clusters of `text`, with an ellipsis when cut
pub fn snippet(text: &str, max: usize) -> String {
    match text.grapheme_indices(true).nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet() {
        assert_eq!(snippet("short", 10), "short");
        assert_eq!(snippet("abcdef", 3), "abc…");
        assert_eq!(snippet("", 3), "");
    }

    #[test]
    fn test_failed_result_and_marker() {
        let result = StepResult::failed(
            0,
            TaskType::Summarize,
            ExecutionError::provider("openai", "rate limited"),
        );
        assert_eq!(result.status, StepStatus::Failure);
        assert_eq!(
            result.error_marker(),
            "[step 0 failed: provider 'openai' failed: rate limited]"
        );

        let cancelled = StepResult::failed(1, TaskType::Polish, ExecutionError::Cancelled);
        assert_eq!(cancelled.status, StepStatus::Cancelled);
    }

    #[test]
    fn test_step_result_serialization_hides_internal_fields() {
        let result = StepResult::new(2, TaskType::Polish, StepStatus::Success)
            .with_input("input text", 5)
            .with_output("output text".to_string(), 100);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["step_order"], 2);
        assert_eq!(json["task_type"], "POLISH");
        assert_eq!(json["input_snippet"], "input…");
        assert_eq!(json["status"], "success");
        assert!(json.get("output").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_chain_event_tagging() {
        let event = ChainEvent::Delta { text: "Hi".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "delta");
        assert_eq!(json["text"], "Hi");
    }
}
