use docent_index::IndexError;
use docent_llm::LlmError;

/// Errors surfaced to the caller of the engine. Transient upstream
/// trouble never lands here, it degrades into an apology answer
/// instead. What remains requires operator attention.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Non-retryable upstream failure (rejected credentials, malformed
    /// request). A new request will not help until an operator fixes the
    /// deployment.
    #[error("upstream provider failure, operator attention required: {0}")]
    Fatal(#[source] LlmError),

    /// Index/configuration failure (dimension or model mismatch, missing
    /// snapshot).
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
