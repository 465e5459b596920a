//! Test-only mock LLM provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message};

/// One scripted outcome for a `chat`/`chat_stream` call, consumed in order.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Reply(String),
    RateLimited,
    Timeout,
    AuthRejected,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    outcomes: Arc<Mutex<Vec<MockOutcome>>>,
    pub default_response: String,
    embedding_dim: usize,
    fixed_embedding: Option<Vec<f32>>,
    pub supports_embeddings: bool,
    chat_calls: Arc<AtomicUsize>,
    embed_calls: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            embedding_dim: 64,
            fixed_embedding: None,
            supports_embeddings: true,
            chat_calls: Arc::new(AtomicUsize::new(0)),
            embed_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(
                responses.into_iter().map(MockOutcome::Reply).collect(),
            )),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_outcomes(outcomes: Vec<MockOutcome>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes)),
            ..Self::default()
        }
    }

    /// Always return the same embedding regardless of input.
    #[must_use]
    pub fn with_fixed_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.fixed_embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn without_embeddings(mut self) -> Self {
        self.supports_embeddings = false;
        self
    }

    /// Number of `chat`/`chat_stream` calls made so far.
    #[must_use]
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<String, LlmError> {
        let mut outcomes = self.outcomes.lock().unwrap();
        let outcome = if outcomes.is_empty() {
            MockOutcome::Reply(self.default_response.clone())
        } else {
            outcomes.remove(0)
        };
        match outcome {
            MockOutcome::Reply(text) => Ok(text),
            MockOutcome::RateLimited => Err(LlmError::RateLimited {
                retry_after_secs: Some(0),
            }),
            MockOutcome::Timeout => Err(LlmError::Timeout),
            MockOutcome::AuthRejected => Err(LlmError::Auth {
                provider: "mock".into(),
            }),
        }
    }
}

/// Deterministic bag-of-words embedding: each lowercased word hashes to a
/// dimension, so texts sharing vocabulary land close under cosine. Good
/// enough to exercise retrieval ordering in tests.
#[must_use]
pub fn hashed_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dim];
    for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let bucket = word_bucket(word, dim);
        vector[bucket] += 1.0;
    }
    vector
}

// FNV-1a, stable across runs and platforms
fn word_bucket(word: &str, dim: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    usize::try_from(hash % dim as u64).unwrap_or(0)
}

impl LlmProvider for MockProvider {
    async fn chat(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.next_outcome()
    }

    async fn chat_stream(&self, _messages: &[Message]) -> Result<ChatStream, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.next_outcome()?;
        let chunks: Vec<_> = response
            .split_inclusive(' ')
            .map(|s| Ok(s.to_owned()))
            .collect();
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported {
                provider: "mock".into(),
            });
        }
        if let Some(ref fixed) = self.fixed_embedding {
            return Ok(fixed.clone());
        }
        Ok(hashed_embedding(text, self.embedding_dim))
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn scripted_responses_consumed_in_order() {
        let provider = MockProvider::with_responses(vec!["one".into(), "two".into()]);
        assert_eq!(provider.chat(&[]).await.unwrap(), "one");
        assert_eq!(provider.chat(&[]).await.unwrap(), "two");
        assert_eq!(provider.chat(&[]).await.unwrap(), "mock response");
        assert_eq!(provider.chat_calls(), 3);
    }

    #[tokio::test]
    async fn rate_limit_then_reply() {
        let provider = MockProvider::with_outcomes(vec![
            MockOutcome::RateLimited,
            MockOutcome::Reply("recovered".into()),
        ]);
        assert!(matches!(
            provider.chat(&[]).await,
            Err(LlmError::RateLimited { .. })
        ));
        assert_eq!(provider.chat(&[]).await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn stream_reassembles_to_response() {
        let provider = MockProvider::with_responses(vec!["hello streaming world".into()]);
        let mut stream = provider.chat_stream(&[]).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap());
        }
        assert_eq!(text, "hello streaming world");
    }

    #[tokio::test]
    async fn hashed_embeddings_similar_for_shared_words() {
        let provider = MockProvider::default();
        let a = provider.embed("idempotency keys expire").await.unwrap();
        let b = provider.embed("how long do idempotency keys last").await.unwrap();
        let c = provider.embed("weather forecast tomorrow").await.unwrap();

        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(a, b)| a * b).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[tokio::test]
    async fn hashed_embedding_deterministic() {
        assert_eq!(hashed_embedding("same text", 64), hashed_embedding("same text", 64));
    }

    #[tokio::test]
    async fn embeddings_can_be_disabled() {
        let provider = MockProvider::default().without_embeddings();
        assert!(!provider.supports_embeddings());
        assert!(matches!(
            provider.embed("x").await,
            Err(LlmError::EmbedUnsupported { .. })
        ));
    }
}
