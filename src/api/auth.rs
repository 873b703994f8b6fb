use axum::http::{header, HeaderMap};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::apikey;

/// Extract the bearer token from the Authorization header. A header without
/// the `Bearer ` prefix is treated as the token itself.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    Some(value.strip_prefix("Bearer ").unwrap_or(value))
}

/// Admin routes require the master key. With no master key configured, auth
/// is disabled (dev mode).
pub fn require_master(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let master = match &state.master_key {
        Some(k) => k,
        None => return Ok(()),
    };
    match bearer(headers) {
        Some(token) if token == master => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "invalid or missing master key".into(),
        )),
    }
}

/// Client routes accept the master key or any stored, unrevoked API key.
pub async fn require_client(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = bearer(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".into()))?;

    if let Some(master) = &state.master_key {
        if token == master {
            return Ok(());
        }
    }

    let hashed = apikey::hash_key(token);
    match state.store.validate_api_key(&hashed).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::Unauthorized("invalid API key".into())),
    }
}
