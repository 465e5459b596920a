//! Error types for docent-index.

/// Errors that can occur while loading, chunking, indexing, or querying
/// the corpus.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading corpus files or index snapshots.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// LLM provider error (embedding).
    #[error("LLM error: {0}")]
    Llm(#[from] docent_llm::LlmError),

    /// Document has no indexable content.
    #[error("document '{doc_id}' is empty")]
    EmptyDocument { doc_id: String },

    /// Document exceeds the size bound with no valid split point.
    #[error("document '{doc_id}' has no valid split point within the size bound")]
    Unsplittable { doc_id: String },

    /// Vector dimension differs from the one the index was built with.
    #[error("vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Persisted index was built by a different embedding model.
    #[error("embedding model mismatch: index built with '{built_with}', configured '{configured}'")]
    ModelMismatch {
        built_with: String,
        configured: String,
    },

    /// Persisted snapshot failed its integrity check.
    #[error("index snapshot corrupt: {0}")]
    Corrupt(String),

    /// Malformed corpus input.
    #[error("corpus error: {0}")]
    Corpus(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
