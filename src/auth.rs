//! Access tokens: HS256 JWTs whose `sub` is the user's ULID.
//!
//! Requests carry the token either as `Authorization: Bearer <token>` or in
//! the `access_token` cookie, which is what browser clients send.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::api::{ApiError, AppState};

const TOKEN_EXPIRY_HOURS: i64 = 24;
const TOKEN_COOKIE: &str = "access_token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Expiration (Unix timestamp seconds)
    pub exp: usize,
    /// Issued at (Unix timestamp seconds)
    pub iat: usize,
}

/// Issue a token for a user.
pub fn create_token(user_id: Ulid, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + chrono::Duration::hours(TOKEN_EXPIRY_HOURS)).timestamp() as usize,
        iat: now.timestamp() as usize,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify a token and return the user id it was issued for.
pub fn verify_token(token: &str, secret: &str) -> Option<Ulid> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| tracing::debug!("token rejected: {e}"))
    .ok()?;
    data.claims.sub.parse().ok()
}

fn token_from_parts(parts: &Parts) -> Option<&str> {
    let headers = &parts.headers;
    if let Some(bearer) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim());
    }
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value)
}

/// The authenticated caller. Rejects with 401 when the token is missing,
/// invalid or expired. Whether the user still exists is for the handler to
/// decide (`create_booking` answers 404 for an unknown user).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Ulid,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(*user);
        }
        let token = token_from_parts(parts).ok_or(ApiError::Unauthorized)?;
        let id = verify_token(token, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;
        let user = CurrentUser { id };
        parts.extensions.insert(user);
        Ok(user)
    }
}
