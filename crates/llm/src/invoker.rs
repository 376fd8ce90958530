use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use docproc_core::config::{LlmConfig, OllamaConfig, TemplateConfig};

use crate::catalog::ModelCatalog;
use crate::provider::{GenerationParams, LlmError, LlmProvider, Message};

/// How long a fetched model list is reused before asking the backend again.
const CATALOG_TTL: Duration = Duration::from_secs(60);

/// A finished generation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Completion {
    pub content: String,
    /// The model that actually ran, after fallback.
    pub model_used: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("model backend unavailable: {0}")]
    ModelUnavailable(String),
    #[error("model invocation timed out")]
    Timeout,
    #[error("model invocation failed: {0}")]
    Failed(String),
}

impl From<LlmError> for InvocationError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::HttpError(e) if e.is_timeout() => InvocationError::Timeout,
            LlmError::HttpError(e) if e.is_connect() => InvocationError::ModelUnavailable(e.to_string()),
            LlmError::ApiError { status, body } if matches!(status, 404 | 502 | 503) => {
                InvocationError::ModelUnavailable(format!("{status}: {body}"))
            }
            LlmError::NotConfigured(msg) => InvocationError::ModelUnavailable(msg),
            other => InvocationError::Failed(other.to_string()),
        }
    }
}

/// Turns a prompt plus extracted document text into a completion.
///
/// `params` is the caller's own parameter snapshot; implementations must not
/// consult any shared mutable settings for sampling values.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        text: &str,
        params: &GenerationParams,
    ) -> Result<Completion, InvocationError>;

    async fn catalog(&self) -> Result<ModelCatalog, InvocationError>;

    async fn health(&self) -> bool {
        self.catalog().await.is_ok()
    }
}

/// [`ModelInvoker`] over an [`LlmProvider`], applying the prompt template and
/// system prompt and falling back to an available model.
pub struct ProviderInvoker {
    provider: Box<dyn LlmProvider>,
    templates: TemplateConfig,
    cached: RwLock<Option<(Instant, ModelCatalog)>>,
}

impl ProviderInvoker {
    pub fn new(provider: Box<dyn LlmProvider>, templates: TemplateConfig) -> Self {
        Self {
            provider,
            templates,
            cached: RwLock::new(None),
        }
    }

    /// Build from config, creating the appropriate provider.
    pub fn from_config(
        llm_config: &LlmConfig,
        ollama_config: &OllamaConfig,
        templates: &TemplateConfig,
    ) -> Result<Self, LlmError> {
        let provider = crate::providers::create_provider(llm_config, ollama_config)?;
        info!(provider = provider.name(), model = provider.default_model(), "LLM provider ready");
        Ok(Self::new(provider, templates.clone()))
    }

    fn build_messages(&self, prompt: &str, text: &str) -> Vec<Message> {
        let user = format!(
            "{}\n\nDocument content:\n{}",
            self.templates.render(prompt.trim()),
            text
        );
        vec![Message::system(self.templates.system_prompt.clone()), Message::user(user)]
    }

    async fn fetch_catalog(&self) -> Result<ModelCatalog, LlmError> {
        if let Some((at, catalog)) = self.cached.read().await.as_ref() {
            if at.elapsed() < CATALOG_TTL {
                return Ok(catalog.clone());
            }
        }
        let models = self.provider.list_models().await?;
        let catalog = ModelCatalog::new(models, self.provider.default_model());
        *self.cached.write().await = Some((Instant::now(), catalog.clone()));
        Ok(catalog)
    }
}

#[async_trait]
impl ModelInvoker for ProviderInvoker {
    async fn generate(
        &self,
        prompt: &str,
        text: &str,
        params: &GenerationParams,
    ) -> Result<Completion, InvocationError> {
        // An unreachable catalog should not block generation; the request decides.
        let catalog = match self.fetch_catalog().await {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "model list unavailable, using requested model");
                ModelCatalog::new(Vec::new(), self.provider.default_model())
            }
        };
        let model = catalog.resolve(params.model.as_deref());
        if let Some(requested) = params.model.as_deref() {
            if requested != model {
                warn!(requested, fallback = %model, "requested model not available, falling back");
            }
        }

        let messages = self.build_messages(prompt, text);
        let content = self.provider.complete(messages, &model, params).await?;
        Ok(Completion {
            content,
            model_used: model,
        })
    }

    async fn catalog(&self) -> Result<ModelCatalog, InvocationError> {
        Ok(self.fetch_catalog().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    type Calls = Arc<Mutex<Vec<(String, Vec<Message>, GenerationParams)>>>;

    struct RecordingProvider {
        models: Result<Vec<String>, u16>,
        calls: Calls,
        list_calls: Arc<AtomicUsize>,
    }

    impl RecordingProvider {
        fn with_models(models: &[&str]) -> Self {
            Self {
                models: Ok(models.iter().map(|s| s.to_string()).collect()),
                calls: Calls::default(),
                list_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing_list() -> Self {
            Self {
                models: Err(500),
                ..Self::with_models(&[])
            }
        }
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn default_model(&self) -> &str {
            "base"
        }

        async fn complete(
            &self,
            messages: Vec<Message>,
            model: &str,
            params: &GenerationParams,
        ) -> Result<String, LlmError> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), messages, params.clone()));
            Ok(format!("answer from {model}"))
        }

        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            match &self.models {
                Ok(m) => Ok(m.clone()),
                Err(status) => Err(LlmError::ApiError { status: *status, body: "down".into() }),
            }
        }
    }

    fn invoker(provider: RecordingProvider) -> ProviderInvoker {
        ProviderInvoker::new(Box::new(provider), TemplateConfig::default())
    }

    #[tokio::test]
    async fn sends_system_prompt_and_templated_user_message() {
        let provider = RecordingProvider::with_models(&["base"]);
        let calls = provider.calls.clone();
        let inv = invoker(provider);

        let out = inv
            .generate("  why?  ", "doc body", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(out.model_used, "base");

        let calls = calls.lock().unwrap();
        let (model, messages, _) = &calls[0];
        assert_eq!(model, "base");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, crate::Role::System);
        assert_eq!(messages[0].content, docproc_core::config::DEFAULT_SYSTEM_PROMPT);
        assert_eq!(
            messages[1].content,
            "Analyze the provided document and answer: why?\n\nDocument content:\ndoc body"
        );
    }

    #[tokio::test]
    async fn passes_task_params_through_unchanged() {
        let provider = RecordingProvider::with_models(&["base", "fast"]);
        let calls = provider.calls.clone();
        let inv = invoker(provider);
        let params = GenerationParams {
            model: Some("fast".into()),
            temperature: 0.2,
            max_tokens: 64,
            ..GenerationParams::default()
        };

        let out = inv.generate("question?", "body", &params).await.unwrap();
        assert_eq!(out, Completion { content: "answer from fast".into(), model_used: "fast".into() });
        assert_eq!(calls.lock().unwrap()[0].2, params);
    }

    #[tokio::test]
    async fn falls_back_to_default_model() {
        let inv = invoker(RecordingProvider::with_models(&["base"]));
        let params = GenerationParams { model: Some("missing".into()), ..GenerationParams::default() };
        let out = inv.generate("question?", "body", &params).await.unwrap();
        assert_eq!(out.model_used, "base");
    }

    #[tokio::test]
    async fn catalog_failure_does_not_block_generation() {
        let inv = invoker(RecordingProvider::failing_list());
        let params = GenerationParams { model: Some("custom".into()), ..GenerationParams::default() };
        let out = inv.generate("question?", "body", &params).await.unwrap();
        assert_eq!(out.model_used, "custom");
        assert!(!inv.health().await);
    }

    #[tokio::test]
    async fn catalog_is_cached() {
        let provider = RecordingProvider::with_models(&["base"]);
        let list_calls = provider.list_calls.clone();
        let inv = invoker(provider);

        inv.catalog().await.unwrap();
        inv.catalog().await.unwrap();
        assert!(inv.health().await);
        assert_eq!(list_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_statuses_map_to_model_unavailable() {
        let err: InvocationError = LlmError::ApiError { status: 404, body: "no model".into() }.into();
        assert!(matches!(err, InvocationError::ModelUnavailable(_)));
        let err: InvocationError = LlmError::ApiError { status: 400, body: "bad".into() }.into();
        assert!(matches!(err, InvocationError::Failed(_)));
    }
}
