//! In-memory vector index for development and testing

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use unicode_segmentation::UnicodeSegmentation;

use crate::domain::chain::ScopeId;
use crate::domain::rag::{RetrievedSnippet, VectorQuery};
use crate::domain::DomainError;

/// A document as loaded into the index
#[derive(Debug, Clone, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub text: String,
    /// Scope the document belongs to; unscoped documents match every query
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug)]
struct StoredDoc {
    document: IndexedDocument,
    terms: HashMap<String, f64>,
    norm: f64,
}

/// Similarity search by cosine distance over lowercase word counts
///
/// Stands in for a real embedding index: no vectors, no persistence.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    documents: RwLock<Vec<StoredDoc>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_documents(
        &self,
        documents: impl IntoIterator<Item = IndexedDocument>,
    ) -> usize {
        let mut stored = self.documents.write().await;
        let before = stored.len();

        for document in documents {
            let terms = term_counts(&document.text);
            let norm = norm(&terms);
            stored.retain(|doc| doc.document.id != document.id);
            stored.push(StoredDoc {
                document,
                terms,
                norm,
            });
        }

        stored.len().saturating_sub(before)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

fn term_counts(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for word in text.unicode_words() {
        *counts.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

fn norm(terms: &HashMap<String, f64>) -> f64 {
    terms.values().map(|c| c * c).sum::<f64>().sqrt()
}

fn cosine_distance(query: &HashMap<String, f64>, query_norm: f64, doc: &StoredDoc) -> f32 {
    if query_norm == 0.0 || doc.norm == 0.0 {
        return 1.0;
    }
    let dot: f64 = query
        .iter()
        .filter_map(|(term, count)| doc.terms.get(term).map(|c| c * count))
        .sum();
    (1.0 - dot / (query_norm * doc.norm)) as f32
}

#[async_trait]
impl VectorQuery for InMemoryVectorIndex {
    async fn query(
        &self,
        text: &str,
        top_n: u32,
        scope: Option<ScopeId>,
    ) -> Result<Vec<RetrievedSnippet>, DomainError> {
        let query = term_counts(text);
        let query_norm = norm(&query);
        let documents = self.documents.read().await;

        let mut scored: Vec<(f32, &IndexedDocument)> = documents
            .iter()
            .filter(|doc| match (scope, doc.document.scope_id) {
                (Some(wanted), Some(own)) => wanted == own,
                _ => true,
            })
            .map(|doc| (cosine_distance(&query, query_norm, doc), &doc.document))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(top_n as usize)
            .map(|(distance, doc)| {
                let mut snippet = RetrievedSnippet::new(&doc.id, &doc.text, distance);
                snippet.metadata = doc.metadata.clone();
                if let Some(scope) = doc.scope_id {
                    snippet = snippet.with_metadata("scope_id", serde_json::json!(scope.value()));
                }
                snippet
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str, scope: Option<u64>) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            text: text.to_string(),
            scope_id: scope.map(ScopeId),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_closest_documents_come_first() {
        let index = InMemoryVectorIndex::new();
        index
            .add_documents(vec![
                doc("a", "The lighthouse keeper climbed the stairs", None),
                doc("b", "Fishing boats left the harbour at dawn", None),
                doc("c", "The harbour at dawn was grey and still", None),
            ])
            .await;

        let results = index.query("harbour at dawn", 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.id != "a"));
        assert!(results[0].distance <= results[1].distance);
    }

    #[tokio::test]
    async fn test_scope_filters_scoped_documents() {
        let index = InMemoryVectorIndex::new();
        index
            .add_documents(vec![
                doc("one", "storm over the bay", Some(1)),
                doc("two", "storm over the bay", Some(2)),
                doc("shared", "a storm", None),
            ])
            .await;

        let results = index.query("storm", 10, Some(ScopeId(1))).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();

        assert_eq!(results.len(), 2);
        assert!(ids.contains(&"one"));
        assert!(ids.contains(&"shared"));
        assert_eq!(results.iter().find(|r| r.id == "one").unwrap().metadata["scope_id"], 1);
    }

    #[tokio::test]
    async fn test_re_adding_replaces_document() {
        let index = InMemoryVectorIndex::new();
        assert_eq!(index.add_documents(vec![doc("a", "first", None)]).await, 1);
        assert_eq!(index.add_documents(vec![doc("a", "second", None)]).await, 0);

        assert_eq!(index.len().await, 1);
        let results = index.query("second", 1, None).await.unwrap();
        assert_eq!(results[0].text, "second");
        assert_eq!(results[0].distance, 0.0);
    }
}
