use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::auth;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::context::Context;
use crate::eval::{self, Evaluation};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EvaluateRequest {
    pub flag_key: String,
    #[serde(default)]
    pub context: Context,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BatchEvaluateRequest {
    pub flags: Vec<String>,
    #[serde(default)]
    pub context: Context,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BatchEvaluateResponse {
    pub results: Vec<Evaluation>,
}

pub async fn evaluate_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EvaluateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_client(&state, &headers).await?;
    if req.flag_key.is_empty() {
        return Err(ApiError::BadRequest("flag_key is required".into()));
    }

    let flag = state
        .store
        .get_flag_for_evaluation(&req.flag_key)
        .await?
        .ok_or_else(|| ApiError::NotFound("flag not found".into()))?;

    Ok(Json(eval::evaluate(&flag, &req.context)))
}

pub async fn evaluate_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchEvaluateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_client(&state, &headers).await?;
    if req.flags.is_empty() {
        return Err(ApiError::BadRequest("flags list is required".into()));
    }

    let mut results = Vec::with_capacity(req.flags.len());
    for flag_key in &req.flags {
        match state.store.get_flag_for_evaluation(flag_key).await? {
            Some(flag) => results.push(eval::evaluate(&flag, &req.context)),
            // A missing flag is an entry, not an error.
            None => results.push(Evaluation::not_found(flag_key.as_str())),
        }
    }

    Ok(Json(BatchEvaluateResponse { results }))
}
