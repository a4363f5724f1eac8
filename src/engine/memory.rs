//! In-process index backend.
//!
//! Documents are split into fixed-size word passages. A query is answered with the passage
//! sharing the most distinct terms with the question; ties go to the earliest passage.

use super::types::{ChunkStream, EngineError, IndexBackend, LoadedDocument, NamespaceIndex};
use async_trait::async_trait;
use futures_util::stream;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

const PASSAGE_WORDS: usize = 64;

/// Answer returned when no passage shares a term with the query.
pub const NO_MATCH_ANSWER: &str = "No relevant content found in the indexed documents.";

/// Backend handing out one fresh [`InMemoryIndex`] per opened namespace.
///
/// The backend holds no state of its own; [`IndexManager`](crate::engine::IndexManager)
/// decides which namespaces are kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryBackend;

impl InMemoryBackend {
    /// Create a backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IndexBackend for InMemoryBackend {
    async fn open_namespace(&self, namespace: &str) -> Result<Arc<dyn NamespaceIndex>, EngineError> {
        tracing::debug!(namespace, "Creating in-memory namespace index");
        Ok(Arc::new(InMemoryIndex::default()))
    }
}

#[derive(Debug, Clone)]
struct Passage {
    doc_id: String,
    text: String,
    terms: HashSet<String>,
}

/// Term-overlap index over word passages.
#[derive(Default)]
pub struct InMemoryIndex {
    passages: RwLock<Vec<Passage>>,
}

impl InMemoryIndex {
    async fn best_passage(&self, query_text: &str) -> Option<String> {
        let query_terms = terms(query_text);
        if query_terms.is_empty() {
            return None;
        }

        let passages = self.passages.read().await;
        let mut best: Option<(usize, &Passage)> = None;
        for passage in passages.iter() {
            let score = passage.terms.intersection(&query_terms).count();
            if score > 0 && best.is_none_or(|(top, _)| score > top) {
                best = Some((score, passage));
            }
        }
        best.map(|(_, passage)| passage.text.clone())
    }
}

#[async_trait]
impl NamespaceIndex for InMemoryIndex {
    async fn insert(&self, doc_id: &str, document: &LoadedDocument) -> Result<(), EngineError> {
        let fresh = split_passages(&document.text)
            .into_iter()
            .map(|text| Passage {
                doc_id: doc_id.to_string(),
                terms: terms(&text),
                text,
            })
            .collect::<Vec<_>>();

        let mut passages = self.passages.write().await;
        passages.retain(|passage| passage.doc_id != doc_id);
        tracing::debug!(doc_id, passages = fresh.len(), "Indexed document passages");
        passages.extend(fresh);
        Ok(())
    }

    async fn query(&self, query_text: &str) -> Result<String, EngineError> {
        Ok(self
            .best_passage(query_text)
            .await
            .unwrap_or_else(|| NO_MATCH_ANSWER.to_string()))
    }

    async fn query_stream(&self, query_text: &str) -> Result<ChunkStream, EngineError> {
        let answer = self.query(query_text).await?;
        let units: Vec<Result<String, EngineError>> = answer
            .split_inclusive(' ')
            .map(|unit| Ok(unit.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(units)))
    }
}

fn split_passages(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(PASSAGE_WORDS)
        .map(|chunk| chunk.join(" "))
        .collect()
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn document(text: &str) -> LoadedDocument {
        LoadedDocument {
            text: text.to_string(),
            title: None,
        }
    }

    #[tokio::test]
    async fn answers_with_best_matching_passage() {
        let index = InMemoryIndex::default();
        index
            .insert("deck", &document("Revenue grew in the third quarter."))
            .await
            .unwrap();
        index
            .insert("other", &document("Hiring slowed across engineering."))
            .await
            .unwrap();

        let answer = index.query("How did revenue change?").await.unwrap();
        assert_eq!(answer, "Revenue grew in the third quarter.");
    }

    #[tokio::test]
    async fn reinserting_replaces_previous_passages() {
        let index = InMemoryIndex::default();
        index.insert("deck", &document("alpha beta")).await.unwrap();
        index.insert("deck", &document("gamma delta")).await.unwrap();

        assert_eq!(index.query("alpha").await.unwrap(), NO_MATCH_ANSWER);
        assert_eq!(index.query("gamma").await.unwrap(), "gamma delta");
    }

    #[tokio::test]
    async fn stream_units_concatenate_to_the_answer() {
        let index = InMemoryIndex::default();
        index
            .insert("deck", &document("margins improved   year over year"))
            .await
            .unwrap();

        let units: Vec<String> = index
            .query_stream("margins")
            .await
            .unwrap()
            .map(|unit| unit.unwrap())
            .collect()
            .await;
        assert_eq!(units, vec!["margins ", "improved ", "year ", "over ", "year"]);
    }

    #[tokio::test]
    async fn backend_opens_independent_empty_indexes() {
        let backend = InMemoryBackend::new();
        let first = backend.open_namespace("a").await.unwrap();
        first.insert("doc", &document("shared words")).await.unwrap();

        let second = backend.open_namespace("a").await.unwrap();
        assert_eq!(first.query("shared").await.unwrap(), "shared words");
        assert_eq!(second.query("shared").await.unwrap(), NO_MATCH_ANSWER);
    }

    #[test]
    fn passages_are_bounded_word_windows() {
        let text = (0..130).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let passages = split_passages(&text);
        assert_eq!(passages.len(), 3);
        assert!(passages[0].starts_with("w0 "));
        assert!(passages[2].starts_with("w128"));
    }
}
