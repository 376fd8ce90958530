use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::check_status;
use crate::provider::{GenerationParams, LlmError, LlmProvider, Message};

pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client, url: String, model: String) -> Self {
        Self { client, url, model }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        model: &str,
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.url);

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let body = json!({
            "model": model,
            "messages": api_messages,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "top_p": params.top_p,
                "num_predict": params.max_tokens,
                "frequency_penalty": params.frequency_penalty,
                "presence_penalty": params.presence_penalty,
            },
        });

        debug!(model, "Ollama request to {}", url);

        let response = self.client.post(&url).json(&body).send().await?;
        let resp: serde_json::Value = check_status(response).await?.json().await?;

        resp["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::ParseError("missing message.content".into()))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.url);
        let response = self.client.get(&url).send().await?;
        let resp: serde_json::Value = check_status(response).await?.json().await?;

        let models = resp["models"]
            .as_array()
            .ok_or_else(|| LlmError::ParseError("missing models[]".into()))?
            .iter()
            .filter_map(|m| m["name"].as_str().map(str::to_string))
            .collect();
        Ok(models)
    }
}
