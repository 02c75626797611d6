use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ExecutionContext, ExecutionError};
use crate::domain::chain::{InputSource, RuleStep, ScopeId};
use crate::domain::rag::{RagConfig, RagRetriever, VectorQuery};

/// Whether a traversal performs real work or only estimates it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Execute,
    DryRun,
}

/// Literal text a step will operate on
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedInput {
    pub text: String,
    /// The text depends on outputs of earlier steps
    pub data_dependent: bool,
    /// The step instruction is already part of `text`
    pub includes_instruction: bool,
    /// Retrieved context snippets, closest first
    pub snippets: Vec<String>,
    pub retrieval_time: Option<Duration>,
}

impl ResolvedInput {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Resolves a step's input source against the execution context
///
/// Dry runs go through the same resolution; only retrieval is swapped for
/// placeholder snippets of the configured average size.
#[derive(Debug, Clone)]
pub struct InputResolver {
    rag: RagConfig,
    retriever: Option<RagRetriever>,
}

impl InputResolver {
    pub fn new(rag: RagConfig) -> Self {
        Self {
            rag,
            retriever: None,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn VectorQuery>) -> Self {
        self.retriever = Some(RagRetriever::new(index, self.rag.clone()));
        self
    }

    pub fn rag_config(&self) -> &RagConfig {
        &self.rag
    }

    pub fn retriever(&self) -> Option<&RagRetriever> {
        self.retriever.as_ref()
    }

    pub async fn resolve(
        &self,
        step: &RuleStep,
        step_order: u32,
        context: &ExecutionContext,
        scope: Option<ScopeId>,
        mode: RunMode,
    ) -> Result<ResolvedInput, ExecutionError> {
        match step.input_source() {
            InputSource::OriginalText => Ok(ResolvedInput::plain(context.original())),
            InputSource::PreviousStep => context
                .previous()
                .map(|text| ResolvedInput {
                    data_dependent: true,
                    ..ResolvedInput::plain(text)
                })
                .ok_or(ExecutionError::MissingPredecessorOutput { step_order }),
            InputSource::NamedStep { reference } => context
                .get(reference)
                .map(|text| ResolvedInput {
                    data_dependent: true,
                    ..ResolvedInput::plain(text)
                })
                .ok_or_else(|| ExecutionError::UnknownVariableReference {
                    name: reference.clone(),
                }),
            InputSource::RagRetrieval {
                top_n,
                query,
                placement,
            } => {
                let instruction = step.instruction().unwrap_or_default();
                let top_n = self.rag.bounded_top_n(*top_n);
                let placement = placement.unwrap_or(self.rag.placement);

                let (snippets, retrieval_time) = match mode {
                    RunMode::DryRun => (self.rag.placeholder_snippets(top_n), None),
                    RunMode::Execute => {
                        let query = query
                            .as_deref()
                            .filter(|q| !q.trim().is_empty())
                            .or(step.instruction())
                            .unwrap_or_else(|| context.original());
                        let (snippets, elapsed) = self.retrieve(query, scope, top_n).await?;
                        (snippets, Some(elapsed))
                    }
                };

                let context_block = RagRetriever::format_context(&snippets);
                Ok(ResolvedInput {
                    text: RagRetriever::compose(instruction, &context_block, placement),
                    data_dependent: false,
                    includes_instruction: true,
                    snippets,
                    retrieval_time,
                })
            }
        }
    }

    async fn retrieve(
        &self,
        query: &str,
        scope: Option<ScopeId>,
        top_n: u32,
    ) -> Result<(Vec<String>, Duration), ExecutionError> {
        let retriever = self
            .retriever
            .as_ref()
            .ok_or_else(|| ExecutionError::RetrievalFailed {
                message: "no vector index is configured".to_string(),
            })?;

        let started = Instant::now();
        let results = retriever
            .retrieve(query, scope, Some(top_n))
            .await
            .map_err(|e| ExecutionError::RetrievalFailed {
                message: e.to_string(),
            })?;

        Ok((
            results.into_iter().map(|s| s.text).collect(),
            started.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::TaskType;
    use crate::domain::rag::mock::MockVectorQuery;
    use crate::domain::rag::{ContextPlacement, RetrievedSnippet};

    fn step(source: InputSource) -> RuleStep {
        RuleStep::new(TaskType::CustomInstruction, source, "m")
            .with_instruction("Describe the harbour.")
    }

    #[tokio::test]
    async fn test_resolves_original_previous_and_named() {
        let resolver = InputResolver::new(RagConfig::default());
        let mut context = ExecutionContext::new("source");

        let original = resolver
            .resolve(&step(InputSource::OriginalText), 0, &context, None, RunMode::Execute)
            .await
            .unwrap();
        assert_eq!(original.text, "source");
        assert!(!original.data_dependent);

        let err = resolver
            .resolve(&step(InputSource::PreviousStep), 0, &context, None, RunMode::Execute)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::MissingPredecessorOutput { step_order: 0 });

        context.record("summary", Some("s"));
        let previous = resolver
            .resolve(&step(InputSource::PreviousStep), 1, &context, None, RunMode::Execute)
            .await
            .unwrap();
        assert_eq!(previous.text, "summary");
        assert!(previous.data_dependent);

        let named = resolver
            .resolve(&step(InputSource::named("s")), 1, &context, None, RunMode::DryRun)
            .await
            .unwrap();
        assert_eq!(named.text, "summary");

        let err = resolver
            .resolve(&step(InputSource::named("missing")), 1, &context, None, RunMode::Execute)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::UnknownVariableReference { ref name } if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_retrieval_combines_instruction_and_context() {
        let index = Arc::new(MockVectorQuery::new().with_results(vec![
            RetrievedSnippet::new("1", "Boats rocked at anchor.", 0.2),
            RetrievedSnippet::new("2", "The harbour smelled of tar.", 0.1),
        ]));
        let resolver = InputResolver::new(RagConfig::default()).with_index(index.clone());
        let context = ExecutionContext::new("source");

        let resolved = resolver
            .resolve(&step(InputSource::rag(2)), 0, &context, None, RunMode::Execute)
            .await
            .unwrap();

        assert_eq!(
            resolved.text,
            "Describe the harbour.\n\n[1] The harbour smelled of tar.\n\n\
             [2] Boats rocked at anchor."
        );
        assert!(resolved.includes_instruction);
        assert_eq!(resolved.snippets.len(), 2);
        assert!(resolved.retrieval_time.is_some());
        assert_eq!(index.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retrieval_placement_override() {
        let index = Arc::new(
            MockVectorQuery::new().with_results(vec![RetrievedSnippet::new("1", "ctx", 0.1)]),
        );
        let resolver = InputResolver::new(RagConfig::default()).with_index(index);
        let source = InputSource::RagRetrieval {
            top_n: Some(1),
            query: Some("harbour".into()),
            placement: Some(ContextPlacement::ContextFirst),
        };

        let resolved = resolver
            .resolve(&step(source), 0, &ExecutionContext::new("s"), None, RunMode::Execute)
            .await
            .unwrap();
        assert_eq!(resolved.text, "[1] ctx\n\nDescribe the harbour.");
    }

    #[tokio::test]
    async fn test_dry_run_retrieval_uses_placeholders_without_querying() {
        let index = Arc::new(MockVectorQuery::new());
        let resolver = InputResolver::new(RagConfig::default()).with_index(index.clone());

        let resolved = resolver
            .resolve(
                &step(InputSource::rag(3)),
                0,
                &ExecutionContext::new("s"),
                None,
                RunMode::DryRun,
            )
            .await
            .unwrap();

        assert_eq!(resolved.snippets.len(), 3);
        assert!(resolved.text.chars().count() >= 3 * 500);
        assert_eq!(index.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retrieval_without_index_fails() {
        let resolver = InputResolver::new(RagConfig::default());
        let err = resolver
            .resolve(
                &step(InputSource::rag(1)),
                0,
                &ExecutionContext::new("s"),
                None,
                RunMode::Execute,
            )
            .await
            .unwrap_err();
        assert!(err.is_input_resolution());
    }
}
