use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::auth;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::broadcast::{Event, EventKind};
use crate::segment::{validate_conditions, CreateSegmentRequest, UpdateSegmentRequest};

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSegmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    req.validate()?;

    let segment = state.store.create_segment(req).await?;
    state.broadcaster.publish(Event::now(
        EventKind::SegmentCreated,
        serde_json::to_value(&segment)?,
    ));
    Ok((StatusCode::CREATED, Json(segment)))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    let segments = state.store.list_segments().await?;
    Ok(Json(segments))
}

pub async fn get_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    let segment = state
        .store
        .get_segment(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound("segment not found".into()))?;
    Ok(Json(segment))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(req): Json<UpdateSegmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    if let Some(conditions) = &req.conditions {
        validate_conditions(conditions)?;
    }

    let segment = state
        .store
        .update_segment(&key, req)
        .await?
        .ok_or_else(|| ApiError::NotFound("segment not found".into()))?;

    state.broadcaster.publish(Event::now(
        EventKind::SegmentUpdated,
        serde_json::to_value(&segment)?,
    ));
    Ok(Json(segment))
}

pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    state.store.delete_segment(&key).await?;

    state
        .broadcaster
        .publish(Event::now(EventKind::SegmentDeleted, json!({ "key": key })));
    Ok(StatusCode::NO_CONTENT)
}
