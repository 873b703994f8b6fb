use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::auth;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::broadcast::{Event, EventKind};
use crate::flag::{CreateFlagRequest, UpdateFlagRequest};

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateFlagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    req.validate()?;

    let flag = state.store.create_flag(req).await?;
    state.broadcaster.publish(Event::now(
        EventKind::FlagCreated,
        serde_json::to_value(&flag)?,
    ));
    Ok((StatusCode::CREATED, Json(flag)))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    let flags = state.store.list_flags().await?;
    Ok(Json(flags))
}

pub async fn get_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    let flag = state
        .store
        .get_flag(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound("flag not found".into()))?;
    Ok(Json(flag))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(req): Json<UpdateFlagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    let flag = state
        .store
        .update_flag(&key, req)
        .await?
        .ok_or_else(|| ApiError::NotFound("flag not found".into()))?;

    state.broadcaster.publish(Event::now(
        EventKind::FlagUpdated,
        serde_json::to_value(&flag)?,
    ));
    Ok(Json(flag))
}

pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    state.store.delete_flag(&key).await?;

    state
        .broadcaster
        .publish(Event::now(EventKind::FlagDeleted, json!({ "key": key })));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    let flag = state
        .store
        .toggle_flag(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound("flag not found".into()))?;

    state.broadcaster.publish(Event::now(
        EventKind::FlagToggled,
        serde_json::to_value(&flag)?,
    ));
    Ok(Json(flag))
}
