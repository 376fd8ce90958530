//! Health, limits and model catalog endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use docproc_llm::ModelCatalog;
use docproc_tasks::{ConfigView, HealthReport, HealthStatus};

use crate::auth::Caller;
use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Service health
///
/// No authentication. Returns 503 when the service cannot accept new tasks.
#[utoipa::path(
    get,
    path = "/api/v2/health",
    tag = "System",
    responses(
        (status = 200, description = "Healthy or degraded", body = Object),
        (status = 503, description = "Unhealthy", body = Object)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let report = state.orchestrator.health().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report))
}

/// Processing limits and feature flags
#[utoipa::path(
    get,
    path = "/api/v2/config",
    tag = "System",
    responses(
        (status = 200, description = "Current limits", body = Object),
        (status = 401, description = "Missing or invalid API key", body = ErrorBody)
    ),
    security(("api_key" = []))
)]
pub async fn config(State(state): State<Arc<AppState>>, _caller: Caller) -> Json<ConfigView> {
    Json(state.orchestrator.config_view())
}

/// Models offered by the backend
///
/// Vision-capable models are listed separately.
#[utoipa::path(
    get,
    path = "/api/v2/models",
    tag = "System",
    responses(
        (status = 200, description = "Model catalog", body = Object),
        (status = 503, description = "Model backend unreachable", body = ErrorBody)
    ),
    security(("api_key" = []))
)]
pub async fn models(State(state): State<Arc<AppState>>, _caller: Caller) -> Result<Json<ModelCatalog>, ApiError> {
    let catalog = state
        .orchestrator
        .catalog()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    Ok(Json(catalog))
}
