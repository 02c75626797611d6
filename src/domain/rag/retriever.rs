use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::{ContextPlacement, RagConfig, RetrievedSnippet, VectorQuery};
use crate::domain::chain::ScopeId;
use crate::domain::DomainError;

/// Bounds, deduplicates and formats similarity-search results
#[derive(Debug, Clone)]
pub struct RagRetriever {
    index: Arc<dyn VectorQuery>,
    config: RagConfig,
}

impl RagRetriever {
    pub fn new(index: Arc<dyn VectorQuery>, config: RagConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn bounded_top_n(&self, requested: Option<u32>) -> u32 {
        self.config.bounded_top_n(requested)
    }

    /// Retrieve up to `top_n` distinct snippets, closest first
    pub async fn retrieve(
        &self,
        query: &str,
        scope: Option<ScopeId>,
        top_n: Option<u32>,
    ) -> Result<Vec<RetrievedSnippet>, DomainError> {
        let top_n = self.bounded_top_n(top_n);
        // Over-fetch so deduplication can still fill the budget
        let fetch = top_n.saturating_mul(2).min(self.config.max_top_n.max(1) * 2);

        let mut results = self.index.query(query, fetch, scope).await?;
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let fetched = results.len();
        let snippets = dedupe(results, self.config.dedup_threshold, top_n as usize);

        debug!(
            top_n = top_n,
            fetched = fetched,
            kept = snippets.len(),
            "Retrieved context snippets"
        );

        Ok(snippets)
    }

    /// Number the snippets in order: `[1] text`
    pub fn format_context<S: AsRef<str>>(snippets: &[S]) -> String {
        snippets
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] {}", i + 1, s.as_ref().trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Combine instruction and context according to the placement
    pub fn compose(instruction: &str, context: &str, placement: ContextPlacement) -> String {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return context.to_string();
        }
        if context.is_empty() {
            return instruction.to_string();
        }

        match placement {
            ContextPlacement::InstructionFirst => format!("{}\n\n{}", instruction, context),
            ContextPlacement::ContextFirst => format!("{}\n\n{}", context, instruction),
        }
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    shared / union
}

/// Keep the closest of each near-identical group, in input order
fn dedupe(sorted: Vec<RetrievedSnippet>, threshold: f64, limit: usize) -> Vec<RetrievedSnippet> {
    let mut kept: Vec<(RetrievedSnippet, HashSet<String>)> = Vec::new();

    for snippet in sorted {
        if kept.len() >= limit {
            break;
        }
        let words = word_set(&snippet.text);
        let duplicate = kept
            .iter()
            .any(|(existing, existing_words)| {
                existing.text.trim() == snippet.text.trim()
                    || similarity(existing_words, &words) >= threshold
            });
        if !duplicate {
            kept.push((snippet, words));
        }
    }

    kept.into_iter().map(|(snippet, _)| snippet).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rag::mock::MockVectorQuery;

    fn retriever(results: Vec<RetrievedSnippet>) -> (RagRetriever, Arc<MockVectorQuery>) {
        let index = Arc::new(MockVectorQuery::new().with_results(results));
        (RagRetriever::new(index.clone(), RagConfig::default()), index)
    }

    #[test]
    fn test_bounded_top_n() {
        let (retriever, _) = retriever(vec![]);
        assert_eq!(retriever.bounded_top_n(None), 5);
        assert_eq!(retriever.bounded_top_n(Some(0)), 1);
        assert_eq!(retriever.bounded_top_n(Some(500)), 20);
        assert_eq!(retriever.bounded_top_n(Some(3)), 3);
    }

    #[tokio::test]
    async fn test_retrieve_sorts_by_distance_and_dedupes() {
        let (retriever, index) = retriever(vec![
            RetrievedSnippet::new("c", "The lighthouse keeper slept.", 0.7),
            RetrievedSnippet::new("a", "Mira walked to the harbour at dawn.", 0.1),
            RetrievedSnippet::new("b", "Mira walked to the harbour at dawn!", 0.2),
            RetrievedSnippet::new("d", "Gulls circled the broken mast.", 0.4),
        ]);

        let snippets = retriever.retrieve("harbour", None, Some(3)).await.unwrap();
        let ids: Vec<&str> = snippets.iter().map(|s| s.id.as_str()).collect();

        assert_eq!(ids, vec!["a", "d", "c"]);
        assert_eq!(index.last_top_n(), Some(6));
    }

    #[tokio::test]
    async fn test_retrieve_stable_for_equal_distances() {
        let (retriever, _) = retriever(vec![
            RetrievedSnippet::new("first", "alpha beta", 0.5),
            RetrievedSnippet::new("second", "gamma delta", 0.5),
        ]);

        let snippets = retriever.retrieve("q", None, Some(2)).await.unwrap();
        assert_eq!(snippets[0].id, "first");
        assert_eq!(snippets[1].id, "second");
    }

    #[tokio::test]
    async fn test_retrieve_propagates_index_errors() {
        let index = Arc::new(MockVectorQuery::new().with_error("index offline"));
        let retriever = RagRetriever::new(index, RagConfig::default());

        let err = retriever.retrieve("q", None, None).await.unwrap_err();
        assert!(err.to_string().contains("index offline"));
    }

    #[test]
    fn test_format_and_compose() {
        let context = RagRetriever::format_context(&["one ", "two"]);
        assert_eq!(context, "[1] one\n\n[2] two");

        assert_eq!(
            RagRetriever::compose("Summarize.", &context, ContextPlacement::InstructionFirst),
            "Summarize.\n\n[1] one\n\n[2] two"
        );
        assert_eq!(
            RagRetriever::compose("Summarize.", &context, ContextPlacement::ContextFirst),
            "[1] one\n\n[2] two\n\nSummarize."
        );
        assert_eq!(RagRetriever::compose("", "ctx", ContextPlacement::ContextFirst), "ctx");
    }

    #[test]
    fn test_placeholder_snippets() {
        let (retriever, _) = retriever(vec![]);
        let placeholders = retriever.config().placeholder_snippets(3);
        assert_eq!(placeholders.len(), 3);
        assert!(placeholders.iter().all(|p| p.chars().count() == 500));
    }
}
