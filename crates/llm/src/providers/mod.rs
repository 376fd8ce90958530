pub mod claude;
pub mod ollama;
pub mod openai;

use std::time::Duration;

use docproc_core::config::{LlmConfig, OllamaConfig};

use crate::provider::{LlmError, LlmProvider};

/// Create the appropriate LLM provider based on config.
pub fn create_provider(
    llm_config: &LlmConfig,
    ollama_config: &OllamaConfig,
) -> Result<Box<dyn LlmProvider>, LlmError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(llm_config.request_timeout_secs))
        .build()?;

    match llm_config.provider.as_str() {
        "openai" => {
            let api_key = llm_config
                .openai_api_key
                .as_ref()
                .ok_or_else(|| LlmError::NotConfigured("OPENAI_API_KEY not set".into()))?;
            let base_url = llm_config
                .openai_base_url
                .as_deref()
                .unwrap_or("https://api.openai.com");
            Ok(Box::new(openai::OpenAiProvider::new(
                client,
                api_key.clone(),
                llm_config.openai_model.clone(),
                base_url.trim_end_matches('/').to_string(),
            )))
        }
        "anthropic" | "claude" => {
            let api_key = llm_config
                .anthropic_api_key
                .as_ref()
                .ok_or_else(|| LlmError::NotConfigured("ANTHROPIC_API_KEY not set".into()))?;
            Ok(Box::new(claude::ClaudeProvider::new(
                client,
                api_key.clone(),
                llm_config.anthropic_model.clone(),
            )))
        }
        "ollama" => Ok(Box::new(ollama::OllamaProvider::new(
            client,
            ollama_config.url.trim_end_matches('/').to_string(),
            ollama_config.model.clone(),
        ))),
        other => Err(LlmError::NotConfigured(format!(
            "unknown LLM provider: '{}'",
            other
        ))),
    }
}

/// Turn a non-200 response into [`LlmError::ApiError`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status().as_u16();
    if status != 200 {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::ApiError { status, body });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.into(),
            openai_api_key: None,
            openai_model: "gpt-4o".into(),
            openai_base_url: None,
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet".into(),
            temperature: 0.7,
            max_tokens: 100,
            top_p: 0.9,
            request_timeout_secs: 5,
        }
    }

    fn ollama() -> OllamaConfig {
        OllamaConfig { url: "http://localhost:11434/".into(), model: "llama3.2".into() }
    }

    #[test]
    fn ollama_needs_no_key() {
        let p = create_provider(&llm("ollama"), &ollama()).unwrap();
        assert_eq!(p.name(), "ollama");
        assert_eq!(p.default_model(), "llama3.2");
    }

    #[test]
    fn openai_without_key_is_not_configured() {
        let err = create_provider(&llm("openai"), &ollama()).err().unwrap();
        assert!(matches!(err, LlmError::NotConfigured(_)));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = create_provider(&llm("mystery"), &ollama()).err().unwrap();
        assert!(err.to_string().contains("mystery"));
    }
}
