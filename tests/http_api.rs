use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use ulid::Ulid;

use deskbook::api::{self, AppState};
use deskbook::engine::Engine;

const SECRET: &str = "integration-secret";

fn app() -> Router {
    let dir = std::env::temp_dir().join("deskbook_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Engine::new(dir.join(format!("{}.wal", Ulid::new()))).unwrap();
    api::router(AppState::new(Arc::new(engine), SECRET), Duration::from_secs(30))
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register(app: &Router, username: &str) -> (String, String) {
    let (status, body) = send(app, "POST", "/api/users", None, Some(json!({ "username": username }))).await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["user"]["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

async fn create_workspace(app: &Router, token: &str, name: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/workspaces",
        Some(token),
        Some(json!({ "name": name, "location": "Level 3", "capacity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["workspace"]["id"].as_str().unwrap().to_string()
}

/// `(startAt, endAt)` on a fixed day well in the future.
fn period(start: &str, end: &str) -> (String, String) {
    let day = (chrono::Utc::now() + chrono::Duration::days(3)).format("%Y-%m-%d");
    (format!("{day}T{start}:00Z"), format!("{day}T{end}:00Z"))
}

fn booking_body(workspace_id: &str, start: &str, end: &str) -> Value {
    let (start_at, end_at) = period(start, end);
    json!({ "workspaceId": workspace_id, "startAt": start_at, "endAt": end_at })
}

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = send(&app, "GET", "/api/workspaces", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn booking_lifecycle() {
    let app = app();
    let (user_id, token) = register(&app, "alice").await;
    let ws = create_workspace(&app, &token, "Focus Room").await;

    let (status, body) = send(&app, "POST", "/api/bookings", Some(&token), Some(booking_body(&ws, "10:00", "11:00"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Booking created");
    assert_eq!(body["booking"]["userId"], user_id.as_str());
    assert_eq!(body["booking"]["workspaceId"], ws.as_str());
    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();

    // partial overlap
    let (status, body) = send(&app, "POST", "/api/bookings", Some(&token), Some(booking_body(&ws, "10:30", "11:30"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already booked"));

    // touching is fine
    let (status, _) = send(&app, "POST", "/api/bookings", Some(&token), Some(booking_body(&ws, "11:00", "12:00"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "GET", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["workspaceName"], "Focus Room");

    // moving within its own period only checks against the others
    let (start_at, end_at) = period("09:30", "10:30");
    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/bookings/{booking_id}"),
        Some(&token),
        Some(json!({ "startAt": start_at, "endAt": end_at })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Booking updated");
    assert_eq!(body["booking"]["period"]["startAt"], start_at);

    let (status, body) = send(&app, "GET", "/api/bookings", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "DELETE", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Booking deleted");

    let (status, _) = send(&app, "GET", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_periods_are_unprocessable() {
    let app = app();
    let (_, token) = register(&app, "alice").await;
    let ws = create_workspace(&app, &token, "Focus Room").await;

    let (status, _) = send(&app, "POST", "/api/bookings", Some(&token), Some(booking_body(&ws, "11:00", "10:00"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "POST", "/api/bookings", Some(&token), Some(booking_body(&ws, "10:00", "10:00"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let past = json!({
        "workspaceId": ws,
        "startAt": "2020-01-01T10:00:00Z",
        "endAt": "2020-01-01T11:00:00Z",
    });
    let (status, body) = send(&app, "POST", "/api/bookings", Some(&token), Some(past)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("past"));

    let garbage = json!({ "workspaceId": ws, "startAt": "soon", "endAt": "later" });
    let (status, body) = send(&app, "POST", "/api/bookings", Some(&token), Some(garbage)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "startAt is not a valid timestamp");
}

#[tokio::test]
async fn missing_entities_are_not_found() {
    let app = app();
    let (_, token) = register(&app, "alice").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/bookings",
        Some(&token),
        Some(booking_body(&Ulid::new().to_string(), "10:00", "11:00")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "workspace not found");

    let (status, _) = send(&app, "GET", "/api/bookings/not-a-ulid", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &format!("/api/workspaces/{}", Ulid::new()), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn authentication_is_required() {
    let app = app();
    let (_, token) = register(&app, "alice").await;
    let ws = create_workspace(&app, &token, "Focus Room").await;

    let (status, body) = send(&app, "POST", "/api/bookings", None, Some(booking_body(&ws, "10:00", "11:00"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&app, "GET", "/api/users/me", Some("forged.token.value"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // a well-formed token for a user this instance never registered
    let stranger = deskbook::auth::create_token(Ulid::new(), SECRET).unwrap();
    let (status, body) = send(&app, "GET", "/api/users/me", Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "user not found");

    let (status, body) = send(&app, "GET", "/api/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
}

#[tokio::test]
async fn booking_by_unregistered_user_is_not_found() {
    let app = app();
    let (_, token) = register(&app, "alice").await;
    let ws = create_workspace(&app, &token, "Focus Room").await;

    let stranger = deskbook::auth::create_token(Ulid::new(), SECRET).unwrap();
    let (status, body) =
        send(&app, "POST", "/api/bookings", Some(&stranger), Some(booking_body(&ws, "10:00", "11:00"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "user not found");

    let (_, body) = send(&app, "GET", &format!("/api/workspaces/{ws}/bookings"), Some(&token), None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_workspace_reported_before_bad_timestamps() {
    let app = app();
    let (_, token) = register(&app, "alice").await;
    let body = json!({ "workspaceId": Ulid::new().to_string(), "startAt": "soon", "endAt": "later" });
    let (status, body) = send(&app, "POST", "/api/bookings", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "workspace not found");
}

#[tokio::test]
async fn token_cookie_is_accepted() {
    let app = app();
    let (_, token) = register(&app, "alice").await;
    let req = Request::builder()
        .uri("/api/users/me")
        .header("cookie", format!("access_token={token}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn only_the_owner_may_delete() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (_, bob) = register(&app, "bob").await;
    let ws = create_workspace(&app, &alice, "Focus Room").await;

    let (_, body) = send(&app, "POST", "/api/bookings", Some(&alice), Some(booking_body(&ws, "10:00", "11:00"))).await;
    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "DELETE", &format!("/api/bookings/{booking_id}"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "DELETE", &format!("/api/bookings/{booking_id}"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn conflict_preflight() {
    let app = app();
    let (_, token) = register(&app, "alice").await;
    let ws = create_workspace(&app, &token, "Focus Room").await;
    let (_, body) = send(&app, "POST", "/api/bookings", Some(&token), Some(booking_body(&ws, "10:00", "11:00"))).await;
    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();

    let check = |start: &str, end: &str, exclude: Option<&str>| {
        let (start_at, end_at) = period(start, end);
        let mut uri = format!("/api/workspaces/{ws}/conflicts?startAt={start_at}&endAt={end_at}");
        if let Some(id) = exclude {
            uri.push_str(&format!("&excludeBookingId={id}"));
        }
        uri
    };

    let (status, body) = send(&app, "GET", &check("10:30", "11:30", None), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conflict"], true);

    let (_, body) = send(&app, "GET", &check("11:00", "12:00", None), Some(&token), None).await;
    assert_eq!(body["conflict"], false);

    let (_, body) = send(&app, "GET", &check("10:30", "11:30", Some(&booking_id)), Some(&token), None).await;
    assert_eq!(body["conflict"], false);

    let (status, _) = send(&app, "GET", &check("11:00", "10:00", None), Some(&token), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (start_at, end_at) = period("10:00", "11:00");
    let uri = format!("/api/workspaces/{}/conflicts?startAt={start_at}&endAt={end_at}", Ulid::new());
    let (status, _) = send(&app, "GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn workspace_directory() {
    let app = app();
    let (_, token) = register(&app, "alice").await;
    let ws = create_workspace(&app, &token, "Focus Room").await;
    create_workspace(&app, &token, "Atrium").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/workspaces",
        Some(&token),
        Some(json!({ "name": "Focus Room", "location": "Level 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Focus Room"));

    let (status, body) = send(&app, "GET", "/api/workspaces", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body.as_array().unwrap().iter().map(|w| w["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["Atrium", "Focus Room"]);

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/workspaces/{ws}"),
        Some(&token),
        Some(json!({ "name": "Quiet Room", "location": "Level 4", "description": "no calls", "capacity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspace"]["name"], "Quiet Room");
    assert_eq!(body["workspace"]["description"], "no calls");
    let stamp = |field: &str| chrono::DateTime::parse_from_rfc3339(body["workspace"][field].as_str().unwrap()).unwrap();
    assert!(stamp("updatedAt") >= stamp("createdAt"));

    send(&app, "POST", "/api/bookings", Some(&token), Some(booking_body(&ws, "10:00", "11:00"))).await;
    let (status, body) = send(&app, "GET", &format!("/api/workspaces/{ws}/bookings"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "DELETE", &format!("/api/workspaces/{ws}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/users")
        .header("content-type", "application/json")
        .body(Body::from("{\"username\":"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert!(resp.status().is_client_error());
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn duplicate_username_is_rejected() {
    let app = app();
    register(&app, "alice").await;
    let (status, _) = send(&app, "POST", "/api/users", None, Some(json!({ "username": "alice" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
