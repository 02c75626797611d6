//! Chain executor: sequential traversal shared by real runs, streaming runs and dry runs

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::invoker::{Delivery, StepInvoker};
use super::resolver::{InputResolver, ResolvedInput, RunMode};
use super::result::{
    ChainEvent, ChainExecutionResult, ChainStatus, DryRunEstimate, StepResult, StepStatus,
};
use super::{ExecutionContext, ExecutionError};
use crate::domain::chain::{ErrorPolicy, ExecutionPlan, RuleStep, TaskType};
use crate::domain::estimation::CostEstimate;

/// Stream of events from a streaming execution, ending with `Completed`
pub type ChainEventStream = ReceiverStream<ChainEvent>;

const EVENT_BUFFER: usize = 64;

/// State at the end of a traversal
struct Traversal {
    results: Vec<StepResult>,
    status: ChainStatus,
    final_output: String,
    warnings: Vec<String>,
}

/// Executes validated chain plans
#[derive(Debug, Clone)]
pub struct ChainExecutor {
    resolver: InputResolver,
    invoker: StepInvoker,
}

impl ChainExecutor {
    pub fn new(resolver: InputResolver, invoker: StepInvoker) -> Self {
        Self { resolver, invoker }
    }

    pub fn resolver(&self) -> &InputResolver {
        &self.resolver
    }

    pub fn invoker(&self) -> &StepInvoker {
        &self.invoker
    }

    /// Run every step and return the complete result
    ///
    /// Never fails: step errors are recorded in the returned result.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        original_text: &str,
        cancel: &CancellationToken,
    ) -> ChainExecutionResult {
        let traversal = self
            .traverse(plan, original_text, RunMode::Execute, None, cancel)
            .await;
        self.finish(plan, original_text, traversal)
    }

    /// Estimate a run without calling any provider
    pub async fn dry_run(&self, plan: &ExecutionPlan, original_text: &str) -> DryRunEstimate {
        let traversal = self
            .traverse(plan, original_text, RunMode::DryRun, None, &CancellationToken::new())
            .await;

        let mut warnings = traversal.warnings;
        let mut estimates = Vec::with_capacity(traversal.results.len());
        for result in traversal.results {
            warnings.extend(result.warnings);
            if let Some(estimate) = result.estimate {
                estimates.push(estimate);
            }
        }

        let prompt_tokens: u64 = estimates.iter().map(|e| e.estimated_prompt_tokens).sum();
        let completion_tokens: u64 = estimates.iter().map(|e| e.max_completion_tokens).sum();
        let total = (!estimates.is_empty()).then_some(prompt_tokens + completion_tokens);
        let estimated_cost = estimates
            .iter()
            .fold(CostEstimate::zero(), |acc, e| acc.add(e.estimated_cost));

        let estimator = self.invoker.estimator();
        let estimate = DryRunEstimate {
            estimated_total_prompt_tokens: prompt_tokens,
            estimated_total_completion_tokens: completion_tokens,
            token_cost_level: estimator.classify(total),
            estimated_cost,
            warnings,
            steps_estimates: estimates,
        };

        info!(
            chain_id = %plan.chain_id,
            steps = estimate.steps_estimates.len(),
            total_tokens = prompt_tokens + completion_tokens,
            level = %estimate.token_cost_level,
            "Dry run estimated"
        );

        estimate
    }

    /// Run the chain in the background, streaming the final step's output
    ///
    /// Dropping the returned stream cancels the execution.
    pub fn execute_stream(
        self: Arc<Self>,
        plan: ExecutionPlan,
        original_text: String,
        cancel: CancellationToken,
    ) -> ChainEventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let run = self.traverse(&plan, &original_text, RunMode::Execute, Some(&tx), &cancel);
            let traversal = tokio::select! {
                traversal = run => traversal,
                _ = tx.closed() => {
                    info!(
                        chain_id = %plan.chain_id,
                        "Stream consumer disconnected; cancelling execution"
                    );
                    cancel.cancel();
                    return;
                }
            };
            let result = self.finish(&plan, &original_text, traversal);

            if tx.send(ChainEvent::Completed { result }).await.is_err() {
                debug!(chain_id = %plan.chain_id, "Stream consumer disconnected before completion");
            }
        });

        ReceiverStream::new(rx)
    }

    async fn traverse(
        &self,
        plan: &ExecutionPlan,
        original_text: &str,
        mode: RunMode,
        sink: Option<&mpsc::Sender<ChainEvent>>,
        cancel: &CancellationToken,
    ) -> Traversal {
        let mut context = ExecutionContext::new(original_text);
        let mut results: Vec<StepResult> = Vec::with_capacity(plan.len());
        let mut warnings = Vec::new();
        let mut status = ChainStatus::Completed;
        let mut final_output = None;
        let last_index = plan.len().saturating_sub(1);

        info!(
            chain_id = %plan.chain_id,
            steps = plan.len(),
            dry_run = mode == RunMode::DryRun,
            "Starting chain traversal"
        );

        for (index, planned) in plan.steps.iter().enumerate() {
            let step = &planned.step;

            if cancel.is_cancelled() {
                status = ChainStatus::Cancelled;
                break;
            }

            debug!(
                chain_id = %plan.chain_id,
                step_order = planned.order,
                task_type = %step.task_type(),
                "Resolving step input"
            );

            let resolution = self
                .resolver
                .resolve(step, planned.order, &context, plan.novel_scope, mode);
            let resolved = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
                resolved = resolution => resolved,
            };

            let resolved = match (resolved, mode) {
                (Ok(resolved), _) => Ok(resolved),
                (Err(error), RunMode::DryRun) => {
                    warnings.push(format!(
                        "step {} input could not be resolved ({}); \
                         using a default-sized placeholder",
                        planned.order, error
                    ));
                    Ok(self.placeholder_input(step))
                }
                (Err(error), RunMode::Execute) => Err(error),
            };

            let result = match resolved {
                Ok(resolved) => {
                    if mode == RunMode::DryRun && resolved.data_dependent {
                        warnings.push(format!(
                            "step {} input is data-dependent and its true size cannot be \
                             estimated before earlier steps run",
                            planned.order
                        ));
                    }

                    let delivery = match sink {
                        Some(sink) if index == last_index => Delivery::Stream(sink),
                        _ => Delivery::Complete,
                    };

                    self.invoker
                        .invoke(planned, &resolved, mode, delivery, cancel)
                        .await
                }
                Err(error) => StepResult::new(planned.order, step.task_type(), StepStatus::Failure)
                    .with_model(step.model_id())
                    .fail(error),
            };

            match result.status {
                StepStatus::Success => {
                    if let Some(output) = &result.output {
                        context.record(output, step.output_variable_name());
                    }
                    debug!(
                        chain_id = %plan.chain_id,
                        step_order = planned.order,
                        "Step completed"
                    );
                    results.push(result);
                }
                StepStatus::Cancelled => {
                    warn!(chain_id = %plan.chain_id, step_order = planned.order, "Step cancelled");
                    final_output = result.output.clone();
                    results.push(result);
                    status = ChainStatus::Cancelled;
                    break;
                }
                StepStatus::Failure | StepStatus::Skipped => {
                    if let Some(outcome) =
                        self.handle_failure(plan, step.error_policy(), result, &mut results)
                    {
                        status = outcome.0;
                        final_output = Some(outcome.1);
                        break;
                    }
                }
            }
        }

        let final_output = final_output.unwrap_or_else(|| {
            context
                .previous()
                .unwrap_or_else(|| context.original())
                .to_string()
        });

        Traversal {
            results,
            status,
            final_output,
            warnings,
        }
    }

    /// Conservative stand-in when a dry run cannot resolve a step's input
    fn placeholder_input(&self, step: &RuleStep) -> ResolvedInput {
        let budget = self.invoker.completion_budget(step);
        ResolvedInput::plain(self.invoker.placeholder_text(step.model_id(), budget))
    }

    /// Apply the step's error policy; returns the terminal state when the chain aborts
    fn handle_failure(
        &self,
        plan: &ExecutionPlan,
        policy: ErrorPolicy,
        mut result: StepResult,
        results: &mut Vec<StepResult>,
    ) -> Option<(ChainStatus, String)> {
        match policy {
            ErrorPolicy::Continue => {
                warn!(
                    chain_id = %plan.chain_id,
                    step_order = result.step_order,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Step failed; skipping"
                );
                result.status = StepStatus::Skipped;
                results.push(result);
                None
            }
            ErrorPolicy::Abort => {
                let marker = result.error_marker();
                error!(
                    chain_id = %plan.chain_id,
                    step_order = result.step_order,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Step failed; aborting chain"
                );
                let snippet_chars = self.invoker.config().snippet_chars;
                let mut synthetic = StepResult::new(
                    (results.len() + 1) as u32,
                    TaskType::ChainExecutionFailure,
                    StepStatus::Failure,
                )
                .with_input(&result.input_snippet, snippet_chars)
                .with_output(marker.clone(), snippet_chars);
                synthetic.error = result.error.clone();

                results.push(result);
                results.push(synthetic);
                Some((ChainStatus::Aborted, marker))
            }
        }
    }

    fn finish(
        &self,
        plan: &ExecutionPlan,
        original_text: &str,
        traversal: Traversal,
    ) -> ChainExecutionResult {
        let total_cost = traversal
            .results
            .iter()
            .filter_map(|r| r.cost)
            .fold(CostEstimate::zero(), CostEstimate::add);

        info!(
            chain_id = %plan.chain_id,
            status = ?traversal.status,
            steps = traversal.results.len(),
            "Chain execution finished"
        );

        ChainExecutionResult {
            original_text: original_text.to_string(),
            final_output_text: traversal.final_output,
            executed_chain_name: plan.chain_name.clone(),
            executed_chain_id: plan.chain_id,
            status: traversal.status,
            steps_results: traversal.results,
            total_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    use crate::domain::chain::{ChainId, InputSource, RuleStep};
    use crate::domain::estimation::{CostLevel, EstimationConfig, TokenEstimator};
    use crate::domain::execution::{ExecutionConfig, HandlerRegistry};
    use crate::domain::llm::{MockLlmProvider, StaticProviderResolver};
    use crate::domain::model::{ModelEntry, ModelRegistry};
    use crate::domain::postprocess::{PostProcessingConfig, PostProcessorRegistry};
    use crate::domain::rag::mock::MockVectorQuery;
    use crate::domain::rag::RagConfig;

    fn executor_with(
        provider: Arc<MockLlmProvider>,
        index: Option<Arc<MockVectorQuery>>,
    ) -> ChainExecutor {
        let models = Arc::new(ModelRegistry::new(vec![
            ModelEntry::new("ok", "openai").with_pricing(0.5, 1.5),
            ModelEntry::new("broken", "openai").with_pricing(0.5, 1.5),
            ModelEntry::new("unpriced", "ollama"),
        ]));
        let estimator = Arc::new(TokenEstimator::new(EstimationConfig::default(), models));

        let mut resolver = InputResolver::new(RagConfig::default());
        if let Some(index) = index {
            resolver = resolver.with_index(index);
        }

        let invoker = StepInvoker::new(
            Arc::new(StaticProviderResolver::new(provider)),
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::new(PostProcessorRegistry::with_defaults(&PostProcessingConfig::default())),
            estimator,
            ExecutionConfig::default(),
        );
        ChainExecutor::new(resolver, invoker)
    }

    fn executor(provider: Arc<MockLlmProvider>) -> ChainExecutor {
        executor_with(provider, None)
    }

    fn plan(steps: Vec<RuleStep>) -> ExecutionPlan {
        ExecutionPlan::new(ChainId(1), "Test chain", steps)
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_pass_outputs_along() {
        let provider = Arc::new(MockLlmProvider::new("mock"));
        let executor = executor(provider.clone());
        let plan = plan(vec![
            RuleStep::new(TaskType::Summarize, InputSource::OriginalText, "ok")
                .with_output_variable("summary"),
            RuleStep::new(TaskType::WordCount, InputSource::PreviousStep, ""),
            RuleStep::new(TaskType::Polish, InputSource::named("summary"), "ok"),
        ]);

        let result = executor
            .execute(&plan, "one two three", &CancellationToken::new())
            .await;

        assert_eq!(result.status, ChainStatus::Completed);
        assert_eq!(result.steps_results.len(), 3);
        assert!(result.steps_results.iter().all(StepResult::is_success));
        assert_eq!(result.steps_results[1].output.as_deref(), Some("3"));
        // The echo provider returns its input, so the named reference skips the word count
        assert_eq!(result.final_output_text, "one two three");
        assert_eq!(result.executed_chain_name, "Test chain");
        assert_eq!(provider.call_count(), 2);
        assert!(result.total_cost.is_known());
    }

    #[tokio::test]
    async fn test_scenario_a_abort_records_failure_and_synthetic_step() {
        let provider = Arc::new(MockLlmProvider::new("mock").with_failing_model("broken"));
        let executor = executor(provider.clone());
        let plan = plan(vec![
            RuleStep::new(TaskType::Summarize, InputSource::OriginalText, "broken"),
            RuleStep::new(TaskType::Polish, InputSource::PreviousStep, "ok"),
        ]);

        let result = executor
            .execute(&plan, "chapter", &CancellationToken::new())
            .await;

        assert_eq!(result.status, ChainStatus::Aborted);
        assert_eq!(result.steps_results.len(), 2);

        let failed = &result.steps_results[0];
        assert_eq!(failed.status, StepStatus::Failure);
        assert!(failed.error.as_deref().unwrap().contains("broken"));

        let synthetic = &result.steps_results[1];
        assert_eq!(synthetic.task_type, TaskType::ChainExecutionFailure);
        assert_eq!(synthetic.step_order, 1);
        assert_eq!(result.final_output_text, failed.error_marker());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_continue_policy_skips_failed_step() {
        let provider = Arc::new(MockLlmProvider::new("mock").with_failing_model("broken"));
        let executor = executor(provider);
        let plan = plan(vec![
            RuleStep::new(TaskType::Polish, InputSource::OriginalText, "ok")
                .with_output_variable("clean"),
            RuleStep::new(TaskType::Expand, InputSource::PreviousStep, "broken")
                .with_output_variable("long")
                .with_error_policy(ErrorPolicy::Continue),
            RuleStep::new(TaskType::WordCount, InputSource::PreviousStep, ""),
        ]);

        let result = executor
            .execute(&plan, "a b", &CancellationToken::new())
            .await;

        assert_eq!(result.status, ChainStatus::Completed);
        let statuses: Vec<StepStatus> = result.steps_results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Success, StepStatus::Skipped, StepStatus::Success]
        );
        // The skipped step leaves `previous` untouched
        assert_eq!(result.final_output_text, "2");
    }

    #[tokio::test]
    async fn test_reference_to_skipped_variable_fails() {
        let provider = Arc::new(MockLlmProvider::new("mock").with_failing_model("broken"));
        let executor = executor(provider);
        let plan = plan(vec![
            RuleStep::new(TaskType::Expand, InputSource::OriginalText, "broken")
                .with_output_variable("long")
                .with_error_policy(ErrorPolicy::Continue),
            RuleStep::new(TaskType::Polish, InputSource::named("long"), "ok"),
        ]);

        let result = executor
            .execute(&plan, "text", &CancellationToken::new())
            .await;

        assert_eq!(result.status, ChainStatus::Aborted);
        let failure = result.steps_results[1].failure.clone().unwrap();
        assert!(matches!(failure, ExecutionError::UnknownVariableReference { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let provider = Arc::new(MockLlmProvider::new("mock"));
        let executor = executor(provider.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = executor
            .execute(
                &plan(vec![RuleStep::new(TaskType::Polish, InputSource::OriginalText, "ok")]),
                "text",
                &cancel,
            )
            .await;

        assert_eq!(result.status, ChainStatus::Cancelled);
        assert!(result.steps_results.is_empty());
        assert_eq!(result.final_output_text, "text");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_and_execution_have_same_step_count() {
        let steps = vec![
            RuleStep::new(TaskType::Summarize, InputSource::OriginalText, "ok")
                .with_output_variable("s"),
            RuleStep::new(TaskType::Polish, InputSource::PreviousStep, "ok"),
            RuleStep::new(TaskType::WordCount, InputSource::named("s"), ""),
            RuleStep::new(TaskType::Translate, InputSource::PreviousStep, "ok").with_parameter(
                "target_language",
                crate::domain::chain::StepParameter::text("German"),
            ),
        ];
        let plan = plan(steps);
        let provider = Arc::new(MockLlmProvider::new("mock"));
        let executor = executor(provider.clone());

        let estimate = executor.dry_run(&plan, "Some chapter text.").await;
        assert_eq!(provider.call_count(), 0);

        let result = executor
            .execute(&plan, "Some chapter text.", &CancellationToken::new())
            .await;

        assert_eq!(estimate.steps_estimates.len(), result.steps_results.len());
        let orders: Vec<u32> = estimate.steps_estimates.iter().map(|e| e.step_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dry_run_totals_and_warnings() {
        let provider = Arc::new(MockLlmProvider::new("mock"));
        let executor = executor(provider);
        let plan = plan(vec![
            RuleStep::new(TaskType::Summarize, InputSource::OriginalText, "ok")
                .with_max_length(100),
            RuleStep::new(TaskType::Polish, InputSource::PreviousStep, "unpriced")
                .with_max_length(50),
        ]);

        let estimate = executor.dry_run(&plan, &"x".repeat(1000)).await;

        assert_eq!(estimate.estimated_total_completion_tokens, 150);
        assert!(estimate.estimated_total_prompt_tokens >= 400 + 40);
        assert_eq!(estimate.token_cost_level, CostLevel::Low);
        assert_eq!(estimate.estimated_cost, CostEstimate::Unknown);
        assert!(estimate.warnings.iter().any(|w| w.contains("data-dependent")));
        assert!(estimate.warnings.iter().any(|w| w.contains("'unpriced'")));
        // The second step is sized from the first step's completion budget
        assert_eq!(
            estimate.steps_estimates[1].estimated_prompt_tokens,
            executor.invoker().estimator().estimate(
                &format!(
                    "Polish the following text: fix grammar and improve flow \
                     without changing the meaning.\n\n{}",
                    "x".repeat(250)
                ),
                "unpriced"
            )
        );
    }

    #[tokio::test]
    async fn test_dry_run_substitutes_placeholder_for_unresolvable_input() {
        let provider = Arc::new(MockLlmProvider::new("mock"));
        let executor = executor(provider.clone());
        let plan = plan(vec![
            RuleStep::new(TaskType::Polish, InputSource::PreviousStep, "ok").with_max_length(80),
        ]);

        let estimate = executor.dry_run(&plan, "Once upon a time.").await;

        assert_eq!(estimate.steps_estimates.len(), 1);
        assert!(estimate
            .warnings
            .iter()
            .any(|w| w.contains("step 0 input could not be resolved")));
        assert_ne!(estimate.token_cost_level, CostLevel::Unknown);
        // 80 tokens worth of placeholder input plus the instruction
        assert!(estimate.steps_estimates[0].estimated_prompt_tokens > 80);
        assert!(estimate.estimated_cost.is_known());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_of_empty_plan_is_unknown() {
        let executor = executor(Arc::new(MockLlmProvider::new("mock")));
        let estimate = executor.dry_run(&plan(vec![]), "text").await;

        assert_eq!(estimate.token_cost_level, CostLevel::Unknown);
        assert!(estimate.steps_estimates.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_b_retrieval_dry_run_estimate() {
        let provider = Arc::new(MockLlmProvider::new("mock"));
        let index = Arc::new(MockVectorQuery::new());
        let executor = executor_with(provider.clone(), Some(index.clone()));
        let instruction = "Describe the harbour at dawn in the style of the earlier chapters.";
        let plan = plan(vec![RuleStep::new(
            TaskType::CustomInstruction,
            InputSource::rag(3),
            "ok",
        )
        .with_instruction(instruction)]);

        let estimate = executor.dry_run(&plan, "unused").await;

        let estimator = executor.invoker().estimator();
        let chunk_tokens = estimator.estimate_chars(RagConfig::default().average_chunk_chars, "ok");
        let expected = estimator.estimate(instruction, "ok") + 3 * chunk_tokens;
        let actual = estimate.steps_estimates[0].estimated_prompt_tokens;
        let deviation = (actual as f64 - expected as f64).abs() / expected as f64;

        assert!(deviation <= 0.05, "expected about {}, got {}", expected, actual);
        assert_eq!(index.call_count(), 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_only_streams_the_last_step() {
        let provider = Arc::new(MockLlmProvider::new("mock").with_response("final words"));
        let executor = Arc::new(executor(provider.clone()));
        let plan = plan(vec![
            RuleStep::new(TaskType::Summarize, InputSource::OriginalText, "ok"),
            RuleStep::new(TaskType::Polish, InputSource::PreviousStep, "ok"),
        ]);

        let events: Vec<ChainEvent> = executor
            .execute_stream(plan, "text".into(), CancellationToken::new())
            .collect()
            .await;

        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ChainEvent::Delta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas.concat(), "final words");

        match events.last() {
            Some(ChainEvent::Completed { result }) => {
                assert_eq!(result.status, ChainStatus::Completed);
                assert_eq!(result.final_output_text, "final words");
            }
            other => panic!("expected a completed event, got {:?}", other),
        }

        let requests = provider.requests();
        assert!(!requests[0].stream);
        assert!(requests[1].stream);
    }

    #[tokio::test]
    async fn test_scenario_c_cancel_mid_stream_keeps_received_chunks() {
        let provider = Arc::new(
            MockLlmProvider::new("mock")
                .with_response("alpha beta gamma delta epsilon zeta")
                .with_chunk_delay(Duration::from_millis(50)),
        );
        let executor = Arc::new(executor(provider));
        let cancel = CancellationToken::new();
        let plan = plan(vec![RuleStep::new(
            TaskType::Continue,
            InputSource::OriginalText,
            "ok",
        )]);

        let mut stream = executor.execute_stream(plan, "text".into(), cancel.clone());
        let mut received = String::new();
        let mut deltas = 0;
        let mut completed = None;

        while let Some(event) = stream.next().await {
            match event {
                ChainEvent::Delta { text } => {
                    received.push_str(&text);
                    deltas += 1;
                    if deltas == 2 {
                        cancel.cancel();
                    }
                }
                ChainEvent::Completed { result } => completed = Some(result),
            }
        }

        let result = completed.expect("terminal event");
        assert_eq!(result.status, ChainStatus::Cancelled);
        assert_eq!(result.steps_results.len(), 1);
        assert_eq!(result.steps_results[0].status, StepStatus::Cancelled);
        assert_eq!(result.final_output_text, received);
        assert_ne!(result.final_output_text, "alpha beta gamma delta epsilon zeta");
    }
}
