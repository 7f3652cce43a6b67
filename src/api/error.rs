use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::engine::EngineError;

/// Everything a handler can fail with, mapped onto a status and a JSON body
/// `{"error": "..."}`. Storage failures are logged here and reach the caller
/// only as a generic message.
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Unauthorized,
    Timeout,
    InvalidTimestamp(&'static str),
    BadRequest(StatusCode, String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.status(), rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::NotFound(..) => StatusCode::NOT_FOUND,
                EngineError::InvalidPeriod | EngineError::StartInPast | EngineError::LimitExceeded(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EngineError::Conflict(_) | EngineError::HasBookings(_) => StatusCode::CONFLICT,
                EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
                EngineError::NameTaken(_) | EngineError::InvalidField(_) => StatusCode::BAD_REQUEST,
                EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::InvalidTimestamp(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(status, _) => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Engine(EngineError::NotFound(kind, _)) => format!("{kind} not found"),
            ApiError::Engine(EngineError::Conflict(_)) => {
                "workspace is already booked during this period".to_string()
            }
            ApiError::Engine(EngineError::Forbidden(_)) => "the booking does not belong to you".to_string(),
            ApiError::Engine(EngineError::WalError(_)) | ApiError::Internal(_) => {
                "internal server error".to_string()
            }
            ApiError::Engine(e) => e.to_string(),
            ApiError::Unauthorized => "unauthorized".to_string(),
            ApiError::Timeout => "request timed out".to_string(),
            ApiError::InvalidTimestamp(field) => format!("{field} is not a valid timestamp"),
            ApiError::BadRequest(_, msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        let body = serde_json::json!({ "error": self.message() });
        (status, Json(body)).into_response()
    }
}
