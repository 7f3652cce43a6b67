use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use ulid::Ulid;

use crate::auth::CurrentUser;
use crate::engine::{Engine, EngineError, EntityKind};
use crate::model::Booking;

use super::{parse_id, parse_timestamp, ApiError, AppState, BookingView};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub workspace_id: String,
    pub start_at: String,
    pub end_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingRequest {
    pub start_at: String,
    pub end_at: String,
}

/// Attach the owner's username and the workspace name.
async fn enrich(engine: &Engine, booking: &Booking) -> BookingView {
    let mut view = BookingView::from(booking);
    view.username = engine.get_user(&booking.user_id).map(|u| u.username);
    view.workspace_name = engine.get_workspace(&booking.workspace_id).await.map(|w| w.name);
    view
}

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(req) = body?;
    // Same order as the engine: user, workspace, then the period.
    if state.engine.get_user(&user.id).is_none() {
        return Err(EngineError::NotFound(EntityKind::User, user.id).into());
    }
    let workspace_id = parse_id(EntityKind::Workspace, &req.workspace_id)?;
    if state.engine.get_workspace(&workspace_id).await.is_none() {
        return Err(EngineError::NotFound(EntityKind::Workspace, workspace_id).into());
    }
    let start = parse_timestamp("startAt", &req.start_at)?;
    let end = parse_timestamp("endAt", &req.end_at)?;

    let booking = state.engine.create_booking(user.id, workspace_id, start, end).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Booking created",
            "booking": BookingView::from(&booking),
        })),
    ))
}

pub async fn list(State(state): State<AppState>, _user: CurrentUser) -> Json<Vec<BookingView>> {
    let usernames: HashMap<Ulid, String> = state
        .engine
        .list_users()
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();
    let workspace_names: HashMap<Ulid, String> = state
        .engine
        .list_workspaces()
        .await
        .into_iter()
        .map(|w| (w.id, w.name))
        .collect();

    let views = state
        .engine
        .list_bookings()
        .await
        .iter()
        .map(|b| {
            let mut view = BookingView::from(b);
            view.username = usernames.get(&b.user_id).cloned();
            view.workspace_name = workspace_names.get(&b.workspace_id).cloned();
            view
        })
        .collect();
    Json(views)
}

pub async fn get(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingView>, ApiError> {
    let id = parse_id(EntityKind::Booking, &booking_id)?;
    let booking = state
        .engine
        .get_booking(&id)
        .await
        .ok_or(EngineError::NotFound(EntityKind::Booking, id))?;
    Ok(Json(enrich(&state.engine, &booking).await))
}

pub async fn update(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(booking_id): Path<String>,
    body: Result<Json<UpdateBookingRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(EntityKind::Booking, &booking_id)?;
    let Json(req) = body?;
    let start = parse_timestamp("startAt", &req.start_at)?;
    let end = parse_timestamp("endAt", &req.end_at)?;

    let booking = state.engine.update_booking(id, start, end).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Booking updated",
        "booking": BookingView::from(&booking),
    })))
}

pub async fn delete(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(booking_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(EntityKind::Booking, &booking_id)?;
    state.engine.delete_booking(id, user.id).await?;
    Ok(Json(json!({ "success": true, "message": "Booking deleted" })))
}
