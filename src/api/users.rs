use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{self, CurrentUser};
use crate::engine::{EngineError, EntityKind};

use super::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
}

/// Register a user and hand back a token for it.
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(req) = body?;
    let user = state.engine.register_user(req.username).await?;
    let token = auth::create_token(user.id, &state.jwt_secret)
        .map_err(|e| ApiError::Internal(format!("token encoding failed: {e}")))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": { "id": user.id, "username": user.username },
            "token": token,
        })),
    ))
}

pub async fn me(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>, ApiError> {
    let user = state
        .engine
        .get_user(&user.id)
        .ok_or(EngineError::NotFound(EntityKind::User, user.id))?;
    Ok(Json(json!({ "id": user.id, "username": user.username })))
}
