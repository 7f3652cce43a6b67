//! HTTP surface: JSON over axum.

mod bookings;
mod error;
mod users;
mod workspaces;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, EntityKind};
use crate::model::{Booking, Ms};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, jwt_secret: &str) -> Self {
        Self {
            engine,
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/api/users", post(users::register))
        .route("/api/users/me", get(users::me))
        .route("/api/bookings", post(bookings::create).get(bookings::list))
        .route(
            "/api/bookings/{booking_id}",
            get(bookings::get).put(bookings::update).delete(bookings::delete),
        )
        .route("/api/workspaces", post(workspaces::create).get(workspaces::list))
        .route(
            "/api/workspaces/{id}",
            get(workspaces::get).put(workspaces::update).delete(workspaces::delete),
        )
        .route("/api/workspaces/{id}/bookings", get(workspaces::bookings))
        .route("/api/workspaces/{id}/conflicts", get(workspaces::conflicts));

    let app = Router::new()
        .route("/health", get(health))
        .merge(api)
        .route_layer(middleware::from_fn(crate::observability::track_requests))
        .with_state(state);
    with_timeout(app, request_timeout).layer(TraceLayer::new_for_http())
}

/// Abort handlers that run past `timeout` with a JSON 408.
fn with_timeout(router: Router, timeout: Duration) -> Router {
    router
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        .layer(middleware::map_response(timeout_body))
}

// The timeout layer answers with an empty body.
async fn timeout_body(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return ApiError::Timeout.into_response();
    }
    response
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Conversions ─────────────────────────────────────────

/// Parse an RFC 3339 timestamp. Timestamps without an offset
/// (`2025-01-02T10:00`, `2025-01-02T10:00:00`) are taken as UTC.
pub fn parse_timestamp(field: &'static str, value: &str) -> Result<Ms, ApiError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
        .ok_or(ApiError::InvalidTimestamp(field))
}

fn to_datetime(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Ids are opaque to callers: anything that doesn't parse simply isn't there.
fn parse_id(kind: EntityKind, raw: &str) -> Result<Ulid, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::Engine(EngineError::NotFound(kind, Ulid::nil()))
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodView {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Ulid,
    pub user_id: Ulid,
    pub workspace_id: Ulid,
    pub period: PeriodView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_name: Option<String>,
}

impl From<&Booking> for BookingView {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            user_id: b.user_id,
            workspace_id: b.workspace_id,
            period: PeriodView {
                start_at: to_datetime(b.period.start),
                end_at: to_datetime(b.period.end),
            },
            username: None,
            workspace_name: None,
        }
    }
}
