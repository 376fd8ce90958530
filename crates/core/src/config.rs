use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn profiled_env_list(profile: &str, key: &str, default: &str) -> Vec<String> {
    profiled_env_or(profile, key, default)
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Analyze the provided document and answer: {prompt}";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant specialized in document analysis.";

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub ollama: OllamaConfig,
    pub storage: StorageConfig,
    pub aws: AwsConfig,
    pub security: SecurityConfig,
    pub templates: TemplateConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `DOCPROC_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("DOCPROC_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            limits: LimitsConfig::from_env_profiled(p),
            memory: MemoryConfig::from_env_profiled(p),
            llm: LlmConfig::from_env_profiled(p),
            ollama: OllamaConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            security: SecurityConfig::from_env_profiled(p),
            templates: TemplateConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.templates.validate()?;
        if self.limits.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_TASKS",
                reason: "must be at least 1".into(),
            });
        }
        if self.memory.per_task_mb == 0 {
            return Err(ConfigError::Invalid {
                key: "MEMORY_PER_TASK_MB",
                reason: "must be at least 1".into(),
            });
        }
        if self.limits.prompt_min_chars > self.limits.prompt_max_chars {
            return Err(ConfigError::Invalid {
                key: "PROMPT_MIN_CHARS",
                reason: "exceeds PROMPT_MAX_CHARS".into(),
            });
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{} (api_enabled={})", self.server.host, self.server.port, self.server.api_enabled);
        tracing::info!(
            "  limits:      max_file={}MB, max_concurrent={}, timeout={}s, queue_max={}",
            self.limits.max_file_size_mb,
            self.limits.max_concurrent_tasks,
            self.limits.task_timeout_secs,
            self.limits.queue_max_size
        );
        tracing::info!(
            "  memory:      per_task={}MB, emergency_stop={}%, policy={}",
            self.memory.per_task_mb,
            self.memory.emergency_stop_threshold,
            self.memory.circuit_policy.as_str()
        );
        tracing::info!("  llm:         provider={}", self.llm.provider);
        tracing::info!("  ollama:      url={}", self.ollama.url);
        tracing::info!(
            "  storage:     upload_dir={}, s3_bucket={}",
            self.storage.upload_dir.display(),
            self.aws.s3_bucket.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  security:    api_keys={}, allow_anonymous={}",
            self.security.api_keys.len(),
            self.security.allow_anonymous
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port, "api_enabled": self.server.api_enabled },
            "limits": {
                "max_file_size_mb": self.limits.max_file_size_mb,
                "max_concurrent_tasks": self.limits.max_concurrent_tasks,
                "task_timeout_secs": self.limits.task_timeout_secs,
                "queue_max_size": self.limits.queue_max_size,
                "retention_hours": self.limits.retention_hours,
                "rate_limit_per_hour": self.limits.rate_limit_per_hour,
                "supported_formats": self.limits.supported_formats,
            },
            "memory": {
                "per_task_mb": self.memory.per_task_mb,
                "emergency_stop_threshold": self.memory.emergency_stop_threshold,
                "circuit_policy": self.memory.circuit_policy.as_str(),
            },
            "llm": {
                "provider": self.llm.provider,
                "configured": self.llm.is_configured(),
                "temperature": self.llm.temperature,
                "max_tokens": self.llm.max_tokens,
                "top_p": self.llm.top_p,
            },
            "ollama": { "url": self.ollama.url, "model": self.ollama.model },
            "storage": {
                "upload_dir": self.storage.upload_dir,
                "s3": self.aws.is_configured(),
            },
            "security": {
                "api_keys": self.security.api_keys.len(),
                "allow_anonymous": self.security.allow_anonymous,
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// When false every endpoint except health answers 503.
    pub api_enabled: bool,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 8000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
            api_enabled: profiled_env_bool(p, "API_ENABLED", true),
        }
    }
}

// ── Limits ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_file_size_mb: u64,
    /// Hard ceiling on concurrent tasks, regardless of memory.
    pub max_concurrent_tasks: usize,
    pub task_timeout_secs: u64,
    pub queue_max_size: usize,
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    pub rate_limit_per_hour: u32,
    pub prompt_min_chars: usize,
    pub prompt_max_chars: usize,
    /// Lowercased extensions accepted for upload.
    pub supported_formats: Vec<String>,
}

impl LimitsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_file_size_mb: profiled_env_parse(p, "MAX_FILE_SIZE_MB", 50),
            max_concurrent_tasks: profiled_env_parse(p, "MAX_CONCURRENT_TASKS", 3),
            task_timeout_secs: profiled_env_parse(p, "TASK_TIMEOUT_SECONDS", 300),
            queue_max_size: profiled_env_parse(p, "QUEUE_MAX_SIZE", 100),
            retention_hours: profiled_env_parse(p, "TASK_RETENTION_HOURS", 24),
            sweep_interval_secs: profiled_env_parse(p, "SWEEP_INTERVAL_SECONDS", 3600),
            rate_limit_per_hour: profiled_env_parse(p, "RATE_LIMIT_PER_HOUR", 100),
            prompt_min_chars: profiled_env_parse(p, "PROMPT_MIN_CHARS", 5),
            prompt_max_chars: profiled_env_parse(p, "PROMPT_MAX_CHARS", 4000),
            supported_formats: profiled_env_list(p, "SUPPORTED_FORMATS", "pdf,txt,md,csv,json"),
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            max_concurrent_tasks: 3,
            task_timeout_secs: 300,
            queue_max_size: 100,
            retention_hours: 24,
            sweep_interval_secs: 3600,
            rate_limit_per_hour: 100,
            prompt_min_chars: 5,
            prompt_max_chars: 4000,
            supported_formats: ["pdf", "txt", "md", "csv", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

// ── Memory / admission ────────────────────────────────────────

/// What `process()` does while the memory circuit breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitPolicy {
    /// Accept the task and hold it in the queue until memory recovers.
    Queue,
    /// Refuse the request with `system_error`.
    Reject,
}

impl CircuitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Reject => "reject",
        }
    }

    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "reject" => Self::Reject,
            _ => Self::Queue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Estimated peak memory of one running task.
    pub per_task_mb: u64,
    /// Used-memory percentage at which admission stops. Clamped to 80..=99.
    pub emergency_stop_threshold: f64,
    pub circuit_policy: CircuitPolicy,
    pub check_interval_secs: u64,
}

impl MemoryConfig {
    fn from_env_profiled(p: &str) -> Self {
        let threshold: f64 = profiled_env_parse(p, "EMERGENCY_STOP_THRESHOLD", 95.0);
        Self {
            per_task_mb: profiled_env_parse(p, "MEMORY_PER_TASK_MB", 512),
            emergency_stop_threshold: threshold.clamp(80.0, 99.0),
            circuit_policy: CircuitPolicy::parse(&profiled_env_or(p, "CIRCUIT_POLICY", "queue")),
            check_interval_secs: profiled_env_parse(p, "MEMORY_CHECK_INTERVAL_SECONDS", 5),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            per_task_mb: 512,
            emergency_stop_threshold: 95.0,
            circuit_policy: CircuitPolicy::Queue,
            check_interval_secs: 5,
        }
    }
}

// ── LLM (OpenAI / Anthropic / Ollama) ─────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai", "anthropic", "ollama"
    pub provider: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "LLM_PROVIDER", "ollama"),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            anthropic_api_key: profiled_env_opt(p, "ANTHROPIC_API_KEY"),
            anthropic_model: profiled_env_or(p, "ANTHROPIC_MODEL", "claude-sonnet-4-5-20250929"),
            temperature: profiled_env_parse(p, "LLM_TEMPERATURE", 0.7),
            max_tokens: profiled_env_parse(p, "LLM_MAX_TOKENS", 8000),
            top_p: profiled_env_parse(p, "LLM_TOP_P", 0.9),
            request_timeout_secs: profiled_env_parse(p, "LLM_REQUEST_TIMEOUT_SECONDS", 600),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "openai" => self.openai_api_key.is_some(),
            "anthropic" | "claude" => self.anthropic_api_key.is_some(),
            "ollama" => true,
            _ => false,
        }
    }

    /// Model used when a request does not name one.
    pub fn default_model<'a>(&'a self, ollama: &'a OllamaConfig) -> &'a str {
        match self.provider.as_str() {
            "openai" => &self.openai_model,
            "anthropic" | "claude" => &self.anthropic_model,
            _ => &ollama.model,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            openai_api_key: None,
            openai_model: "gpt-4o".into(),
            openai_base_url: None,
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-5-20250929".into(),
            temperature: 0.7,
            max_tokens: 8000,
            top_p: 0.9,
            request_timeout_secs: 600,
        }
    }
}

// ── Ollama (local models) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
}

impl OllamaConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_or(p, "OLLAMA_URL", "http://localhost:11434"),
            model: profiled_env_or(p, "OLLAMA_MODEL", "llama3.2"),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Transient upload directory, emptied as tasks finish extraction.
    pub upload_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "DATA_DIR", "data"));
        let upload_dir = profiled_env_opt(p, "UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("uploads"));
        Self { data_dir, upload_dir }
    }
}

// ── AWS / S3 ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            s3_bucket: profiled_env_opt(p, "S3_BUCKET"),
            s3_prefix: profiled_env_opt(p, "S3_PREFIX"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_key_id.is_some() && self.s3_bucket.is_some()
    }
}

// ── Security ──────────────────────────────────────────────────

/// Owner assigned to unauthenticated callers when anonymous access is on.
pub const ANONYMOUS_OWNER: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// `(api_key, owner)` pairs parsed from `API_KEYS=key:owner,key2:owner2`.
    #[serde(skip_serializing)]
    pub api_keys: Vec<(String, String)>,
    pub allow_anonymous: bool,
}

impl SecurityConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_keys: parse_api_keys(&profiled_env_or(p, "API_KEYS", "")),
            allow_anonymous: profiled_env_bool(p, "ALLOW_ANONYMOUS", false),
        }
    }
}

/// Parse `key:owner` pairs. A bare key is its own owner.
fn parse_api_keys(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((key, owner)) if !owner.trim().is_empty() => {
                (key.trim().to_string(), owner.trim().to_string())
            }
            Some((key, _)) => (key.trim().to_string(), key.trim().to_string()),
            None => (entry.to_string(), entry.to_string()),
        })
        .collect()
}

// ── Prompt templates ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Wraps the user prompt. Must contain `{prompt}`.
    pub prompt_template: String,
    pub system_prompt: String,
}

impl TemplateConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            prompt_template: profiled_env_or(p, "PROMPT_TEMPLATE", DEFAULT_PROMPT_TEMPLATE),
            system_prompt: profiled_env_or(p, "SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.prompt_template.contains("{prompt}") {
            return Err(ConfigError::Invalid {
                key: "PROMPT_TEMPLATE",
                reason: "must contain {prompt}".into(),
            });
        }
        Ok(())
    }

    pub fn render(&self, prompt: &str) -> String {
        self.prompt_template.replace("{prompt}", prompt)
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}
