//! LLM Provider implementations for mcpchat.
//!
//! All providers implement the `mcpchat_core::Provider` trait.
//! [`router::build_from_config`] picks one based on configuration.

pub mod gemini;
pub mod openai_compat;
pub mod router;

pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::build_from_config;

use mcpchat_core::ProviderError;

/// Map a reqwest transport failure onto the provider error taxonomy.
pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status onto the provider error taxonomy.
pub(crate) fn status_error(status: u16, body: &str, model: &str) -> ProviderError {
    let message = error_message(body);
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => ProviderError::AuthenticationFailed(message),
        // Google answers a bad key with 400 rather than 401.
        400 if message.contains("API key not valid") => {
            ProviderError::AuthenticationFailed(message)
        }
        404 => ProviderError::ModelNotFound(model.to_string()),
        _ => ProviderError::ApiError {
            status_code: status,
            message,
        },
    }
}

/// Pull a human-readable message out of an error body.
///
/// Both Google and OpenAI-style APIs wrap errors as `{"error": {"message": ...}}`.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}
