use std::sync::Arc;

use docproc_tasks::Orchestrator;

use crate::auth::AuthProvider;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: Arc<dyn AuthProvider>,
    /// `*` allows any origin.
    pub cors_origin: String,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            orchestrator,
            auth,
            cors_origin: "*".to_string(),
        }
    }

    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = origin.into();
        self
    }

    /// Largest request body accepted by `POST /process`: the file limit plus
    /// room for the form fields.
    pub fn upload_body_limit(&self) -> usize {
        const FORM_OVERHEAD: u64 = 1024 * 1024;
        let max = self.orchestrator.settings().limits.max_file_size_bytes();
        usize::try_from(max.saturating_add(FORM_OVERHEAD)).unwrap_or(usize::MAX)
    }
}
