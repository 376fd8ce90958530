//! Caller identity.
//!
//! Credentials are API keys sent as `Authorization: Bearer <key>` or
//! `X-API-Key: <key>`. The [`Caller`] extractor resolves them through the
//! state's [`AuthProvider`] before any handler that needs an owner runs.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use thiserror::Error;
use tracing::debug;

use docproc_core::config::{SecurityConfig, ANONYMOUS_OWNER};

use crate::error::ApiError;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

/// The verified caller. `owner` scopes every task operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub owner: String,
}

impl Identity {
    pub fn new(owner: impl Into<String>) -> Self {
        Self { owner: owner.into() }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Unauthorized {
    #[error("missing API key")]
    Missing,
    #[error("invalid API key")]
    Invalid,
}

pub trait AuthProvider: Send + Sync {
    /// Resolve a credential, or `None` when the request carried none.
    fn verify(&self, credential: Option<&str>) -> Result<Identity, Unauthorized>;
}

/// Static key table from `API_KEYS`, optionally letting keyless callers in
/// as the anonymous owner.
pub struct ApiKeyAuth {
    keys: HashMap<String, String>,
    allow_anonymous: bool,
}

impl ApiKeyAuth {
    pub fn new<I, K, O>(keys: I, allow_anonymous: bool) -> Self
    where
        I: IntoIterator<Item = (K, O)>,
        K: Into<String>,
        O: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(|(k, o)| (k.into(), o.into())).collect(),
            allow_anonymous,
        }
    }

    pub fn from_config(security: &SecurityConfig) -> Self {
        Self::new(security.api_keys.iter().cloned(), security.allow_anonymous)
    }
}

impl AuthProvider for ApiKeyAuth {
    fn verify(&self, credential: Option<&str>) -> Result<Identity, Unauthorized> {
        match credential {
            Some(key) => self
                .keys
                .get(key)
                .map(Identity::new)
                .ok_or(Unauthorized::Invalid),
            None if self.allow_anonymous => Ok(Identity::new(ANONYMOUS_OWNER)),
            None => Err(Unauthorized::Missing),
        }
    }
}

/// Pull the API key out of the request headers. Bearer wins over `X-API-Key`.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let api_key = || {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };
    bearer.or_else(api_key).filter(|k| !k.is_empty())
}

/// Extractor for the authenticated caller.
pub struct Caller(pub Identity);

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let credential = credential_from_headers(&parts.headers);
        match state.auth.verify(credential) {
            Ok(identity) => Ok(Caller(identity)),
            Err(e) => {
                debug!(path = %parts.uri.path(), reason = %e, "rejected unauthenticated request");
                Err(e.into())
            }
        }
    }
}
