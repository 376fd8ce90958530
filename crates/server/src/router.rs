//! HTTP router construction.
//!
//! Assembles the `/api/v2` routes, middleware, and OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.upload_body_limit();
    let cors = cors_layer(&state.cors_origin);

    let v2 = Router::new()
        .route(
            "/process",
            post(api::process).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/status/{task_id}", get(api::task_status))
        .route("/tasks", get(api::list_tasks))
        .route("/tasks/{task_id}", delete(api::cancel_task))
        .route("/health", get(api::health))
        .route("/config", get(api::config))
        .route("/models", get(api::models));

    Router::new()
        .nest("/api/v2", v2)
        .layer(cors)
        .with_state(state)
        .merge(Scalar::with_url("/docs", api::doc::ApiDoc::openapi()))
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin.trim() == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS origin, allowing any origin");
            CorsLayer::permissive()
        }
    }
}
