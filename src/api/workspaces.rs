use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ulid::Ulid;

use crate::auth::CurrentUser;
use crate::engine::{EngineError, EntityKind};
use crate::model::{Workspace, WorkspaceFields};

use super::{parse_id, parse_timestamp, to_datetime, ApiError, AppState, BookingView};

fn default_capacity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceRequest {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

impl From<WorkspaceRequest> for WorkspaceFields {
    fn from(req: WorkspaceRequest) -> Self {
        Self {
            name: req.name,
            location: req.location,
            description: req.description.filter(|d| !d.trim().is_empty()),
            capacity: req.capacity,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceView {
    pub id: Ulid,
    pub name: String,
    pub location: String,
    pub description: Option<String>,
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Workspace> for WorkspaceView {
    fn from(w: Workspace) -> Self {
        Self {
            id: w.id,
            name: w.name,
            location: w.location,
            description: w.description,
            capacity: w.capacity,
            created_at: to_datetime(w.created_at),
            updated_at: to_datetime(w.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictQuery {
    pub start_at: String,
    pub end_at: String,
    #[serde(default)]
    pub exclude_booking_id: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    _user: CurrentUser,
    body: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(req) = body?;
    let workspace = state.engine.create_workspace(req.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "workspace": WorkspaceView::from(workspace) })),
    ))
}

pub async fn list(State(state): State<AppState>, _user: CurrentUser) -> Json<Vec<WorkspaceView>> {
    let workspaces = state.engine.list_workspaces().await;
    Json(workspaces.into_iter().map(WorkspaceView::from).collect())
}

pub async fn get(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<WorkspaceView>, ApiError> {
    let id = parse_id(EntityKind::Workspace, &id)?;
    let workspace = state
        .engine
        .get_workspace(&id)
        .await
        .ok_or(EngineError::NotFound(EntityKind::Workspace, id))?;
    Ok(Json(workspace.into()))
}

pub async fn update(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
    body: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(EntityKind::Workspace, &id)?;
    let Json(req) = body?;
    let workspace = state.engine.update_workspace(id, req.into()).await?;
    Ok(Json(json!({ "success": true, "workspace": WorkspaceView::from(workspace) })))
}

pub async fn delete(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(EntityKind::Workspace, &id)?;
    state.engine.delete_workspace(id).await?;
    Ok(Json(json!({ "success": true, "message": "Workspace deleted" })))
}

/// Bookings of one workspace, earliest first.
pub async fn bookings(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<BookingView>>, ApiError> {
    let id = parse_id(EntityKind::Workspace, &id)?;
    let bookings = state.engine.list_workspace_bookings(&id).await?;
    Ok(Json(bookings.iter().map(BookingView::from).collect()))
}

/// Pre-flight check for a prospective booking: `{"conflict": bool}`.
pub async fn conflicts(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
    query: Result<Query<ConflictQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(EntityKind::Workspace, &id)?;
    let Query(q) = query?;
    let start = parse_timestamp("startAt", &q.start_at)?;
    let end = parse_timestamp("endAt", &q.end_at)?;
    if start >= end {
        return Err(EngineError::InvalidPeriod.into());
    }
    // An unparseable exclusion id can't name an existing booking.
    let exclude = q.exclude_booking_id.and_then(|raw| raw.parse::<Ulid>().ok());

    if state.engine.get_workspace(&id).await.is_none() {
        return Err(EngineError::NotFound(EntityKind::Workspace, id).into());
    }
    let conflict = state.engine.check_conflict(id, start, end, exclude).await;
    Ok(Json(json!({ "conflict": conflict })))
}
