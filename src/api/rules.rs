use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::auth;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::broadcast::{Event, EventKind};
use crate::flag::validate_value_for_type;
use crate::rule::RuleInput;

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(flag_key): Path<String>,
    Json(input): Json<RuleInput>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;

    let flag = state
        .store
        .get_flag(&flag_key)
        .await?
        .ok_or_else(|| ApiError::NotFound("flag not found".into()))?;

    input.validate()?;
    validate_value_for_type(flag.kind, &input.value)
        .map_err(|e| ApiError::BadRequest(format!("value: {e}")))?;

    let rule = state.store.create_rule(&flag_key, input).await?;
    state.broadcaster.publish(Event::now(
        EventKind::RuleCreated,
        serde_json::to_value(&rule)?,
    ));
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((flag_key, rule_id)): Path<(String, i64)>,
    Json(input): Json<RuleInput>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;

    let flag = state
        .store
        .get_flag(&flag_key)
        .await?
        .ok_or_else(|| ApiError::NotFound("flag not found".into()))?;

    input.validate()?;
    validate_value_for_type(flag.kind, &input.value)
        .map_err(|e| ApiError::BadRequest(format!("value: {e}")))?;

    let rule = state.store.update_rule(&flag_key, rule_id, input).await?;
    state.broadcaster.publish(Event::now(
        EventKind::RuleUpdated,
        serde_json::to_value(&rule)?,
    ));
    Ok(Json(rule))
}

pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((flag_key, rule_id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_master(&state, &headers)?;
    state.store.delete_rule(&flag_key, rule_id).await?;

    state.broadcaster.publish(Event::now(
        EventKind::RuleDeleted,
        json!({ "flag_key": flag_key, "rule_id": rule_id }),
    ));
    Ok(StatusCode::NO_CONTENT)
}
