use std::time::Duration;

use crate::error::LlmError;

/// Shared HTTP client with a connect timeout; per-call deadlines are
/// enforced by the engine, not here.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// Map a non-success response to the error taxonomy.
///
/// 429 carries the parsed `Retry-After` header so the caller can honor the
/// server's pacing; 401/403 are credential failures requiring operator
/// action; everything else non-success is a generic API error with the
/// body attached for diagnostics.
pub(crate) async fn check_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited {
            retry_after_secs: retry_after_secs(&response),
        });
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(LlmError::Auth {
            provider: provider.to_owned(),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!("{provider} API error {status}: {body}");
        return Err(LlmError::Api {
            status: status.as_u16(),
            message: truncate(&body, 200),
        });
    }

    Ok(response)
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_owned()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}
