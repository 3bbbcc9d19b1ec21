//! Decision step implementations for tierbot.
//!
//! All implementations satisfy `tierbot_core::DecisionStep`; `build_from_config`
//! picks the endpoint named in the `[decision]` config section.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatDecisionStep;

use std::time::Duration;
use tierbot_config::DecisionConfig;
use tierbot_core::error::DecisionError;

/// Build the configured decision step.
///
/// Hosted providers need an API key; a missing key is `NotConfigured`.
pub fn build_from_config(
    config: &DecisionConfig,
) -> Result<OpenAiCompatDecisionStep, DecisionError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let key = || {
        config.api_key.clone().ok_or_else(|| {
            DecisionError::NotConfigured(format!(
                "no API key for provider '{}' (set TIERBOT_API_KEY or OPENAI_API_KEY)",
                config.provider
            ))
        })
    };

    let (name, base_url, api_key) = match (config.provider.as_str(), config.api_url.as_deref()) {
        ("ollama", url) => (
            "ollama",
            url.unwrap_or("http://localhost:11434/v1").to_string(),
            config.api_key.clone().unwrap_or_else(|| "ollama".into()),
        ),
        ("openrouter", url) => (
            "openrouter",
            url.unwrap_or("https://openrouter.ai/api/v1").to_string(),
            key()?,
        ),
        ("openai", url) => (
            "openai",
            url.unwrap_or("https://api.openai.com/v1").to_string(),
            key()?,
        ),
        (_, Some(url)) => ("custom", url.to_string(), config.api_key.clone().unwrap_or_default()),
        (other, None) => {
            return Err(DecisionError::NotConfigured(format!(
                "unknown provider '{other}' and no api_url given"
            )));
        }
    };

    tracing::debug!(provider = name, base_url = %base_url, model = %config.model, "Decision step configured");

    Ok(
        OpenAiCompatDecisionStep::with_timeout(name, base_url, api_key, &config.model, timeout)?
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens),
    )
}
