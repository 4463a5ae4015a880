//! Provider selection from configuration.

use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;
use mcpchat_config::AppConfig;
use mcpchat_core::error::ProviderError;
use mcpchat_core::provider::Provider;
use std::sync::Arc;
use tracing::info;

/// Build the provider named by `config.provider`.
///
/// `gemini` (alias `google`) uses the native API; anything else is treated as
/// an OpenAI-compatible endpoint, taken from `[providers.<name>] api_url` or
/// the built-in table of well-known URLs.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.provider.as_str();
    let api_key = config
        .require_api_key()
        .map_err(|e| ProviderError::NotConfigured(e.to_string()))?
        .to_string();
    let api_url = config
        .providers
        .get(name)
        .and_then(|p| p.api_url.as_deref());

    let provider: Arc<dyn Provider> = match name {
        "gemini" | "google" => {
            let mut gemini = GeminiProvider::new(api_key)?;
            if let Some(url) = api_url {
                gemini = gemini.with_base_url(url);
            }
            Arc::new(gemini)
        }
        _ => {
            let base_url = api_url
                .or_else(|| OpenAiCompatProvider::default_base_url(name))
                .ok_or_else(|| {
                    ProviderError::NotConfigured(format!(
                        "unknown provider '{name}': set providers.{name}.api_url"
                    ))
                })?;
            Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)?)
        }
    };

    info!(provider = %provider.name(), model = %config.model, "Provider ready");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpchat_config::ProviderConfig;

    fn config(provider: &str, key: Option<&str>) -> AppConfig {
        AppConfig {
            provider: provider.into(),
            api_key: key.map(String::from),
            ..AppConfig::default()
        }
    }

    #[test]
    fn gemini_is_the_default() {
        let p = build_from_config(&config("gemini", Some("k"))).unwrap();
        assert_eq!(p.name(), "gemini");
    }

    #[test]
    fn missing_key_is_not_configured() {
        let err = build_from_config(&config("gemini", None)).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn keyless_local_provider() {
        let p = build_from_config(&config("ollama", None)).unwrap();
        assert_eq!(p.name(), "ollama");
    }

    #[test]
    fn unknown_provider_needs_a_url() {
        let err = build_from_config(&config("acme", Some("k"))).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(m) if m.contains("acme")));

        let mut cfg = config("acme", Some("k"));
        cfg.providers.insert(
            "acme".into(),
            ProviderConfig {
                api_key: None,
                api_url: Some("http://localhost:9000/v1".into()),
            },
        );
        assert_eq!(build_from_config(&cfg).unwrap().name(), "acme");
    }
}
