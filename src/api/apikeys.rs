use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::api::auth;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::apikey::{self, CreateApiKeyRequest};

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    if req.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }

    let (key, hashed) = apikey::generate(&req.name, req.environment);
    state.store.create_api_key(&key.api_key, &hashed).await?;

    // The raw key is shown only this once.
    Ok((StatusCode::CREATED, Json(key)))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    let keys = state.store.list_api_keys().await?;
    Ok(Json(keys))
}

pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    state.store.revoke_api_key(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
