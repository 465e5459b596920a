#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request timed out")]
    Timeout,

    #[error("authentication rejected by {provider}")]
    Auth { provider: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("SSE parse error: {0}")]
    SseParse(String),

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: String },

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether a fresh attempt can reasonably succeed without operator action.
    ///
    /// Rate limits, timeouts, and transport failures are transient; rejected
    /// credentials and other API-level errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout | Self::Http(_) => true,
            Self::Json(_)
            | Self::Auth { .. }
            | Self::Api { .. }
            | Self::EmptyResponse { .. }
            | Self::SseParse(_)
            | Self::EmbedUnsupported { .. }
            | Self::Other(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
