//! Semantic retrieval: query embedding, floor filtering, top-k selection.

use std::sync::Arc;

use docent_llm::LlmProvider;

use crate::error::Result;
use crate::store::{ScoredChunk, SharedIndex};

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Maximum chunks returned per query (default: 4).
    pub top_k: usize,
    /// Minimum normalized similarity to accept (default: 0.3).
    pub score_floor: f32,
    /// Prefix the query with recent questions before embedding, so
    /// follow-ups like "how do I cancel it?" still land near the right
    /// documents (default: true).
    pub history_aware: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            score_floor: 0.3,
            history_aware: true,
        }
    }
}

/// Retrieves the most relevant chunks for a query from the published
/// index snapshot.
pub struct Retriever<P: LlmProvider> {
    index: Arc<SharedIndex>,
    provider: Arc<P>,
    config: RetrievalConfig,
}

impl<P: LlmProvider> Retriever<P> {
    #[must_use]
    pub fn new(index: Arc<SharedIndex>, provider: Arc<P>, config: RetrievalConfig) -> Self {
        Self {
            index,
            provider,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve up to `top_k` chunks above the relevance floor, highest
    /// score first. Zero hits is a valid outcome; the caller decides how
    /// to answer without context.
    ///
    /// # Errors
    ///
    /// Returns an error if query embedding or the index lookup fails.
    pub async fn retrieve(
        &self,
        query: &str,
        recent_questions: &[String],
    ) -> Result<Vec<ScoredChunk>> {
        let query_text = self.expand_query(query, recent_questions);
        let vector = self.provider.embed(&query_text).await?;

        let snapshot = self.index.snapshot();
        let mut hits = snapshot.query(&vector, self.config.top_k)?;
        hits.retain(|h| h.score >= self.config.score_floor);

        tracing::debug!(
            hits = hits.len(),
            top_score = hits.first().map_or(0.0, |h| h.score),
            "retrieval done"
        );
        Ok(hits)
    }

    fn expand_query(&self, query: &str, recent_questions: &[String]) -> String {
        if !self.config.history_aware || recent_questions.is_empty() {
            return query.to_owned();
        }
        let mut expanded = recent_questions.join("\n");
        expanded.push('\n');
        expanded.push_str(query);
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkMeta, VectorIndex};
    use docent_llm::mock::{MockProvider, hashed_embedding};

    fn meta(chunk_id: &str, text: &str) -> ChunkMeta {
        ChunkMeta {
            chunk_id: chunk_id.into(),
            doc_id: "doc".into(),
            title: "Doc".into(),
            category: "General".into(),
            source: "doc.md".into(),
            position: 0,
            text: text.into(),
        }
    }

    fn index_with(texts: &[(&str, &str)]) -> Arc<SharedIndex> {
        let mut index = VectorIndex::new("mock-embed", 64);
        for (id, text) in texts {
            index.upsert(hashed_embedding(text, 64), meta(id, text)).unwrap();
        }
        Arc::new(SharedIndex::new(index))
    }

    fn retriever(index: Arc<SharedIndex>, config: RetrievalConfig) -> Retriever<MockProvider> {
        Retriever::new(index, Arc::new(MockProvider::default()), config)
    }

    #[tokio::test]
    async fn relevant_chunk_ranks_first() {
        let index = index_with(&[
            ("idem_0", "Idempotency keys expire after 24 hours."),
            ("webhook_0", "Webhook endpoints must return a 2xx status."),
            ("dispute_0", "Disputes open a formal evidence submission window."),
        ]);
        let r = retriever(
            index,
            RetrievalConfig {
                score_floor: 0.0,
                ..RetrievalConfig::default()
            },
        );

        let hits = r
            .retrieve("How long do idempotency keys last?", &[])
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].meta.chunk_id, "idem_0");
    }

    #[tokio::test]
    async fn scores_non_increasing_and_bounded_by_k() {
        let texts: Vec<(String, String)> = (0..10)
            .map(|i| (format!("c{i}"), format!("document text number {i} about payments")))
            .collect();
        let refs: Vec<(&str, &str)> =
            texts.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let r = retriever(
            index_with(&refs),
            RetrievalConfig {
                top_k: 4,
                score_floor: 0.0,
                history_aware: true,
            },
        );

        let hits = r.retrieve("payments", &[]).await.unwrap();
        assert!(hits.len() <= 4);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn floor_filters_weak_hits() {
        let index = index_with(&[("c0", "completely unrelated text about gardening tulips")]);
        let r = retriever(
            index,
            RetrievalConfig {
                score_floor: 0.95,
                ..RetrievalConfig::default()
            },
        );

        let hits = r.retrieve("payment disputes", &[]).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_index_is_empty_result_not_error() {
        let index = Arc::new(SharedIndex::new(VectorIndex::new("mock-embed", 64)));
        let r = retriever(index, RetrievalConfig::default());
        let hits = r.retrieve("anything", &[]).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn query_expansion_prepends_history() {
        let index = Arc::new(SharedIndex::new(VectorIndex::new("mock-embed", 64)));
        let r = retriever(index, RetrievalConfig::default());
        let expanded = r.expand_query(
            "how do I cancel it?",
            &["How do subscriptions work?".to_owned()],
        );
        assert_eq!(expanded, "How do subscriptions work?\nhow do I cancel it?");
    }

    #[test]
    fn query_expansion_disabled_keeps_query() {
        let index = Arc::new(SharedIndex::new(VectorIndex::new("mock-embed", 64)));
        let r = retriever(
            index,
            RetrievalConfig {
                history_aware: false,
                ..RetrievalConfig::default()
            },
        );
        let expanded = r.expand_query("q", &["previous".to_owned()]);
        assert_eq!(expanded, "q");
    }
}
