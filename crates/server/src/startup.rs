//! Server startup: collaborator wiring and shared state initialization.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use docproc_core::Config;
use docproc_ingest::DocumentExtractor;
use docproc_llm::ProviderInvoker;
use docproc_storage::{ObjectUploadStore, StorageBackend};
use docproc_tasks::{Collaborators, Orchestrator, SystemMemoryProbe};

use crate::auth::ApiKeyAuth;
use crate::state::AppState;

/// Build `AppState` from config. Background loops are not started here.
pub async fn build_app_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let invoker = ProviderInvoker::from_config(&config.llm, &config.ollama, &config.templates)
        .context("failed to initialize LLM provider")?;

    let backend = StorageBackend::from_config(&config.storage, &config.aws)
        .context("failed to initialize upload storage")?;
    let uploads = ObjectUploadStore::new(&backend);
    info!(backend = uploads.backend_label(), "upload storage ready");

    // Tasks do not survive a restart, so every stored upload is an orphan.
    match uploads.sweep_older_than(Utc::now() + chrono::Duration::seconds(1)).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "cleared uploads left by a previous run"),
        Err(e) => warn!(error = %e, "could not sweep leftover uploads"),
    }

    let orchestrator = Orchestrator::from_config(
        config,
        Collaborators {
            extractor: Arc::new(DocumentExtractor::new()),
            invoker: Arc::new(invoker),
            uploads: Arc::new(uploads),
            memory_probe: Arc::new(SystemMemoryProbe),
        },
    );

    if config.security.api_keys.is_empty() && !config.security.allow_anonymous {
        warn!("no API_KEYS configured and ALLOW_ANONYMOUS=false: every authenticated route will return 401");
    }
    let auth = ApiKeyAuth::from_config(&config.security);

    Ok(Arc::new(
        AppState::new(orchestrator, Arc::new(auth)).with_cors_origin(config.server.cors_origin.clone()),
    ))
}
