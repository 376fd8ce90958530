//! OpenAPI documentation aggregator.
//!
//! Collects all `#[utoipa::path]`-annotated handlers and `ToSchema`-derived
//! types into a single OpenAPI spec, served via Scalar UI at `/docs`.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "docproc API",
        version = "2.0.0",
        description = "Document processing with a language model, tracked as asynchronous tasks under memory-aware admission control.",
    ),
    tags(
        (name = "Processing", description = "Submit a document and prompt as a task"),
        (name = "Tasks", description = "Task status, cancellation and listing"),
        (name = "System", description = "Health, limits and model catalog"),
    ),
    paths(
        crate::api::process::process,
        crate::api::tasks::task_status,
        crate::api::tasks::cancel_task,
        crate::api::tasks::list_tasks,
        crate::api::system::health,
        crate::api::system::config,
        crate::api::system::models,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::api::tasks::CancelResponse,
        crate::api::tasks::TaskListResponse,
    )),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_key",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "x_api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/api/v2/process",
            "/api/v2/status/{task_id}",
            "/api/v2/tasks/{task_id}",
            "/api/v2/tasks",
            "/api/v2/health",
            "/api/v2/config",
            "/api/v2/models",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
