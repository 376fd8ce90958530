use serde::Serialize;

/// Substrings that mark a model as able to read images.
const VISION_KEYWORDS: &[&str] = &["vision", "gpt-4", "claude-3", "llava", "gemini"];

pub fn is_vision_model(name: &str) -> bool {
    let lower = name.to_lowercase();
    VISION_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Models the backend currently offers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelCatalog {
    pub models: Vec<String>,
    pub default_model: String,
    pub vision_models: Vec<String>,
}

impl ModelCatalog {
    pub fn new(models: Vec<String>, default_model: impl Into<String>) -> Self {
        let vision_models = models.iter().filter(|m| is_vision_model(m)).cloned().collect();
        Self {
            models,
            default_model: default_model.into(),
            vision_models,
        }
    }

    /// Pick the model to run: the requested one if offered, else the default
    /// if offered, else the first available. An empty catalog trusts the request.
    pub fn resolve(&self, requested: Option<&str>) -> String {
        let wanted = requested.unwrap_or(&self.default_model);
        if self.models.is_empty() || self.models.iter().any(|m| m == wanted) {
            return wanted.to_string();
        }
        if self.models.iter().any(|m| m == &self.default_model) {
            return self.default_model.clone();
        }
        self.models[0].clone()
    }
}
