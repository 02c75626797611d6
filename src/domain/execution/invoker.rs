use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::handler::{HandlerRegistry, StepPlan};
use super::resolver::{ResolvedInput, RunMode};
use super::result::{ChainEvent, StepEstimate, StepResult, StepStatus, TokenUsage};
use super::{ExecutionConfig, ExecutionError};
use crate::domain::chain::{PlannedStep, RuleStep};
use crate::domain::estimation::{CostEstimate, TokenEstimator};
use crate::domain::llm::{LlmProvider, LlmRequest, ProviderResolver, Usage};
use crate::domain::model::MAX_COMPLETION_TOKENS;
use crate::domain::postprocess::PostProcessorRegistry;

/// Upper bound on the stand-in text a dry run materialises for one step
pub const MAX_PLACEHOLDER_CHARS: usize = 1 << 20;

/// How a real provider call hands back its text
#[derive(Debug, Clone, Copy)]
pub enum Delivery<'a> {
    /// Wait for the complete output
    Complete,
    /// Forward each chunk to the sink as it arrives
    Stream(&'a mpsc::Sender<ChainEvent>),
}

struct CallOutput {
    text: String,
    usage: Option<Usage>,
}

struct CallFailure {
    error: ExecutionError,
    partial: Option<String>,
}

impl CallFailure {
    fn new(error: ExecutionError) -> Self {
        Self {
            error,
            partial: None,
        }
    }

    fn with_partial(error: ExecutionError, partial: String) -> Self {
        Self {
            error,
            partial: Some(partial),
        }
    }
}

/// Runs one step, either for real or as an estimate
///
/// Both paths share the same entry point so that switching to a dry run
/// never changes step ordering or resolution.
#[derive(Debug, Clone)]
pub struct StepInvoker {
    providers: Arc<dyn ProviderResolver>,
    handlers: Arc<HandlerRegistry>,
    postprocessors: Arc<PostProcessorRegistry>,
    estimator: Arc<TokenEstimator>,
    config: ExecutionConfig,
}

impl StepInvoker {
    pub fn new(
        providers: Arc<dyn ProviderResolver>,
        handlers: Arc<HandlerRegistry>,
        postprocessors: Arc<PostProcessorRegistry>,
        estimator: Arc<TokenEstimator>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            providers,
            handlers,
            postprocessors,
            estimator,
            config,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn postprocessors(&self) -> &PostProcessorRegistry {
        &self.postprocessors
    }

    /// Completion budget: declared max length, then overrides, then model and engine defaults
    pub fn completion_budget(&self, step: &RuleStep) -> u32 {
        step.generation_constraints()
            .max_length
            .or(step.llm_overrides().max_tokens)
            .or_else(|| {
                self.estimator
                    .models()
                    .get(step.model_id())
                    .and_then(|m| m.max_completion_tokens)
            })
            .unwrap_or(self.config.default_max_completion_tokens)
            .clamp(1, MAX_COMPLETION_TOKENS)
    }

    pub async fn invoke(
        &self,
        planned: &PlannedStep,
        input: &ResolvedInput,
        mode: RunMode,
        delivery: Delivery<'_>,
        cancel: &CancellationToken,
    ) -> StepResult {
        let step = &planned.step;
        let base = StepResult::new(planned.order, step.task_type(), StepStatus::Success)
            .with_model(step.model_id())
            .with_input(&input.text, self.config.snippet_chars);

        let Some(handler) = self.handlers.get(step.task_type()) else {
            return base.fail(ExecutionError::UnknownHandler {
                task_type: step.task_type(),
            });
        };
        let plan = handler.prepare(step, input);

        match mode {
            RunMode::DryRun => self.estimate(planned, input, plan, base),
            RunMode::Execute => match plan {
                Ok(StepPlan::Local(text)) => self.finish_local(step, text, base),
                Ok(StepPlan::Llm(request)) => {
                    self.execute_llm(step, request, base, delivery, cancel).await
                }
                Err(error) => base.fail(error),
            },
        }
    }

    fn finish_local(&self, step: &RuleStep, text: String, mut base: StepResult) -> StepResult {
        let outcome = self
            .postprocessors
            .apply(&text, step.post_processing_rules());
        base.cost = Some(CostEstimate::zero());
        base.with_output(outcome.text, self.config.snippet_chars)
            .with_warnings(outcome.warnings)
    }

    async fn execute_llm(
        &self,
        step: &RuleStep,
        mut request: LlmRequest,
        base: StepResult,
        delivery: Delivery<'_>,
        cancel: &CancellationToken,
    ) -> StepResult {
        let model_id = step.model_id();
        request.max_tokens = Some(self.completion_budget(step));
        let prompt_text = request.prompt_text();

        let provider = match self.providers.resolve(model_id).await {
            Ok(provider) => provider,
            Err(e) => return base.fail(e.into()),
        };

        let timeout_ms = step.timeout_ms().unwrap_or(self.config.step_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        debug!(
            model = %model_id,
            provider = provider.provider_name(),
            timeout_ms = timeout_ms,
            streaming = matches!(delivery, Delivery::Stream(_)),
            "Invoking provider"
        );

        let call = match delivery {
            Delivery::Complete => {
                call_complete(provider.as_ref(), model_id, request, deadline, timeout_ms, cancel)
                    .await
            }
            Delivery::Stream(sink) => {
                call_streaming(
                    provider.as_ref(),
                    model_id,
                    request,
                    deadline,
                    timeout_ms,
                    sink,
                    cancel,
                )
                .await
            }
        };

        match call {
            Ok(output) => {
                let usage = match output.usage.filter(Usage::is_reported) {
                    Some(u) => TokenUsage {
                        prompt_tokens: u64::from(u.prompt_tokens),
                        completion_tokens: u64::from(u.completion_tokens),
                        estimated: false,
                    },
                    None => TokenUsage {
                        prompt_tokens: self.estimator.estimate(&prompt_text, model_id),
                        completion_tokens: self.estimator.estimate(&output.text, model_id),
                        estimated: true,
                    },
                };
                let outcome = self
                    .postprocessors
                    .apply(&output.text, step.post_processing_rules());

                let mut result = base
                    .with_output(outcome.text, self.config.snippet_chars)
                    .with_warnings(outcome.warnings);
                result.cost = Some(self.estimator.cost(
                    model_id,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                ));
                result.usage = Some(usage);
                result
            }
            Err(failure) => {
                let result = base.fail(failure.error);
                match failure.partial {
                    Some(partial) => result.with_output(partial, self.config.snippet_chars),
                    None => result,
                }
            }
        }
    }

    fn estimate(
        &self,
        planned: &PlannedStep,
        input: &ResolvedInput,
        plan: Result<StepPlan, ExecutionError>,
        base: StepResult,
    ) -> StepResult {
        let step = &planned.step;
        let model_id = step.model_id();
        let mut warnings = Vec::new();

        let (model, prompt_tokens, max_completion, output) = match plan {
            Ok(StepPlan::Local(text)) => {
                let outcome = self
                    .postprocessors
                    .apply(&text, step.post_processing_rules());
                warnings.extend(outcome.warnings);
                ("local".to_string(), 0, 0, outcome.text)
            }
            Ok(StepPlan::Llm(request)) => {
                let budget = self.completion_budget(step);
                (
                    model_id.to_string(),
                    self.estimator.estimate(&request.prompt_text(), model_id),
                    u64::from(budget),
                    self.placeholder_text(model_id, budget),
                )
            }
            Err(error) => {
                warn!(
                    step_order = planned.order,
                    error = %error,
                    "Estimating step from its input alone"
                );
                warnings.push(format!(
                    "step {} could not be prepared ({}); estimated from its input alone",
                    planned.order, error
                ));
                let budget = self.completion_budget(step);
                (
                    model_id.to_string(),
                    self.estimator.estimate(&input.text, model_id),
                    u64::from(budget),
                    self.placeholder_text(model_id, budget),
                )
            }
        };

        let cost = if max_completion == 0 && prompt_tokens == 0 {
            CostEstimate::zero()
        } else {
            self.estimator.cost(model_id, prompt_tokens, max_completion)
        };
        if !cost.is_known() {
            let gap = ExecutionError::EstimationUnavailable {
                model_id: model_id.to_string(),
            };
            warn!(step_order = planned.order, "{}", gap);
            warnings.push(format!("step {}: {}", planned.order, gap));
        }

        let mut result = base
            .with_output(output, self.config.snippet_chars)
            .with_warnings(warnings);
        result.cost = Some(cost);
        result.estimate = Some(StepEstimate {
            step_order: planned.order,
            task_type: step.task_type(),
            model_to_be_used: model,
            estimated_prompt_tokens: prompt_tokens,
            max_completion_tokens: max_completion,
            estimated_cost: cost,
        });
        result
    }

    /// Stand-in for a text of `tokens` tokens, capped at `MAX_PLACEHOLDER_CHARS`
    pub fn placeholder_text(&self, model_id: &str, tokens: u32) -> String {
        let chars = (f64::from(tokens) * self.estimator.chars_per_token(model_id)).ceil();
        "x".repeat((chars as usize).min(MAX_PLACEHOLDER_CHARS))
    }
}

async fn call_complete(
    provider: &dyn LlmProvider,
    model_id: &str,
    request: LlmRequest,
    deadline: Instant,
    timeout_ms: u64,
    cancel: &CancellationToken,
) -> Result<CallOutput, CallFailure> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CallFailure::new(ExecutionError::Cancelled)),
        outcome = timeout_at(deadline, provider.chat(model_id, request)) => match outcome {
            Err(_) => Err(CallFailure::new(ExecutionError::Timeout { timeout_ms })),
            Ok(Err(e)) => Err(CallFailure::new(e.into())),
            Ok(Ok(response)) => Ok(CallOutput {
                text: response.content,
                usage: response.usage,
            }),
        },
    }
}

async fn call_streaming(
    provider: &dyn LlmProvider,
    model_id: &str,
    mut request: LlmRequest,
    deadline: Instant,
    timeout_ms: u64,
    sink: &mpsc::Sender<ChainEvent>,
    cancel: &CancellationToken,
) -> Result<CallOutput, CallFailure> {
    request.stream = true;

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CallFailure::new(ExecutionError::Cancelled)),
        opened = timeout_at(deadline, provider.chat_stream(model_id, request)) => match opened {
            Err(_) => return Err(CallFailure::new(ExecutionError::Timeout { timeout_ms })),
            Ok(Err(e)) => return Err(CallFailure::new(e.into())),
            Ok(Ok(stream)) => stream,
        },
    };

    let mut text = String::new();
    let mut usage = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CallFailure::with_partial(ExecutionError::Cancelled, text));
            }
            // The consumer went away
            _ = sink.closed() => {
                return Err(CallFailure::with_partial(ExecutionError::Cancelled, text));
            }
            next = timeout_at(deadline, stream.next()) => match next {
                Err(_) => {
                    let error = ExecutionError::Timeout { timeout_ms };
                    return Err(CallFailure::with_partial(error, text));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(CallFailure::with_partial(e.into(), text)),
                Ok(Some(Ok(mut chunk))) => {
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                    if let Some(delta) = chunk.take_text() {
                        if sink.send(ChainEvent::Delta { text: delta.clone() }).await.is_err() {
                            return Err(CallFailure::with_partial(ExecutionError::Cancelled, text));
                        }
                        text.push_str(&delta);
                    }
                }
            },
        }
    }

    Ok(CallOutput { text, usage })
}
