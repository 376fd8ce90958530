use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::check_status;
use crate::provider::{GenerationParams, LlmError, LlmProvider, Message, Role};

const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ClaudeProvider {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn name(&self) -> &'static str {
        "anthropic"
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
        let url = format!("{API_BASE}/v1/messages");

        // Claude API takes the system prompt as a separate field.
        let system_msg = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        // Anthropic has no frequency/presence penalties.
        let mut body = json!({
            "model": model,
            "messages": api_messages,
            "temperature": params.temperature.min(1.0),
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
        });

        if let Some(system) = system_msg {
            body["system"] = json!(system);
        }

        debug!(model, "Claude request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        let resp: serde_json::Value = check_status(response).await?.json().await?;

        resp["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::ParseError("missing content[0].text".into()))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{API_BASE}/v1/models");
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await?;
        let resp: serde_json::Value = check_status(response).await?.json().await?;

        let models = resp["data"]
            .as_array()
            .ok_or_else(|| LlmError::ParseError("missing data[]".into()))?
            .iter()
            .filter_map(|m| m["id"].as_str().map(str::to_string))
            .collect();
        Ok(models)
    }
}
