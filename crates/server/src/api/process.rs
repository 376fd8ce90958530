//! `POST /process`: accept an upload and a prompt as a new task.

use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, info};

use docproc_core::{media_type_for, FileInfo};
use docproc_tasks::scope::{MAX_TOKENS, MODEL, TEMPERATURE, TOP_P};
use docproc_tasks::{ParameterMap, ProcessRequest, Submission};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Form fields of a process request before validation.
#[derive(Default)]
struct ProcessForm {
    file: Option<(FileInfo, Bytes)>,
    prompt: Option<String>,
    overrides: ParameterMap,
    /// Explicit form fields, applied over `overrides`.
    explicit: ParameterMap,
}

impl ProcessForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = ProcessForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => form.file = Some(read_file(field).await?),
                "prompt" => form.prompt = Some(field.text().await?),
                "overrides" => form.overrides = parse_overrides(&field.text().await?)?,
                "model" => {
                    let model = field.text().await?;
                    if !model.trim().is_empty() {
                        form.explicit.insert(MODEL.into(), Value::String(model.trim().to_string()));
                    }
                }
                TEMPERATURE | TOP_P => {
                    let raw = field.text().await?;
                    form.explicit.insert(name.clone(), parse_number(&name, &raw)?);
                }
                MAX_TOKENS => {
                    let raw = field.text().await?;
                    form.explicit.insert(name.clone(), parse_integer(&name, &raw)?);
                }
                other => debug!(field = other, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    fn into_request(self, owner: String) -> Result<ProcessRequest, ApiError> {
        let (file, bytes) = self
            .file
            .ok_or_else(|| ApiError::BadRequest("missing form field 'file'".into()))?;
        let prompt = self
            .prompt
            .ok_or_else(|| ApiError::BadRequest("missing form field 'prompt'".into()))?;
        let mut overrides = self.overrides;
        overrides.extend(self.explicit);
        Ok(ProcessRequest {
            owner,
            file,
            bytes,
            prompt,
            overrides,
        })
    }
}

async fn read_file(field: Field<'_>) -> Result<(FileInfo, Bytes), ApiError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let declared = field.content_type().map(str::to_string);
    let bytes = field.bytes().await?;

    let mut info = FileInfo::new(filename, bytes.len() as u64, String::new());
    info.media_type = match declared {
        Some(ct) if ct != "application/octet-stream" => ct,
        _ => media_type_for(&info.extension()).to_string(),
    };
    Ok((info, bytes))
}

fn parse_overrides(raw: &str) -> Result<ParameterMap, ApiError> {
    if raw.trim().is_empty() {
        return Ok(ParameterMap::new());
    }
    serde_json::from_str(raw).map_err(|e| ApiError::BadRequest(format!("'overrides' must be a JSON object: {e}")))
}

fn parse_number(name: &str, raw: &str) -> Result<Value, ApiError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ApiError::BadRequest(format!("'{name}' must be a number, got '{raw}'")))
}

fn parse_integer(name: &str, raw: &str) -> Result<Value, ApiError> {
    raw.trim()
        .parse::<u64>()
        .map(Value::from)
        .map_err(|_| ApiError::BadRequest(format!("'{name}' must be a positive integer, got '{raw}'")))
}

/// Submit a document for processing
///
/// Accepts multipart/form-data with `file` and `prompt`, plus optional
/// `model`, `temperature`, `max_tokens`, `top_p` and an `overrides` JSON
/// object. The task starts immediately when a slot is free, otherwise it is
/// queued and the response carries its position.
#[utoipa::path(
    post,
    path = "/api/v2/process",
    tag = "Processing",
    request_body(content_type = "multipart/form-data", description = "File upload with prompt"),
    responses(
        (status = 200, description = "Task started or queued", body = Object),
        (status = 400, description = "Validation failed", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid API key", body = crate::error::ErrorBody),
        (status = 413, description = "File too large", body = crate::error::ErrorBody),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ErrorBody),
        (status = 503, description = "Queue full, memory circuit open or API disabled", body = crate::error::ErrorBody)
    ),
    security(("api_key" = []))
)]
pub async fn process(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    multipart: Multipart,
) -> Result<Json<Submission>, ApiError> {
    let request = ProcessForm::read(multipart).await?.into_request(identity.owner)?;
    info!(
        owner = %request.owner,
        file = %request.file.filename,
        size = request.file.size,
        "process request received"
    );
    let submission = state.orchestrator.process(request).await?;
    Ok(Json(submission))
}
