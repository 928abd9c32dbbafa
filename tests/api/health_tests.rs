//! Health and auth-gate tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use crate::common::TestApp;

#[tokio::test]
async fn health_check_reports_healthy() {
    let app = TestApp::new();

    let (status, body) = app.request("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn liveness_probe_is_alive() {
    let app = TestApp::new();

    let (status, body) = app.request("GET", "/health/live", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn readiness_reports_single_process_backplane() {
    let app = TestApp::new();
    let _socket = app.connect(1).await;

    let (status, body) = app.request("GET", "/health/ready", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["backplane"]["mode"], "single_process");
    assert_eq!(body["checks"]["websocket"]["active_connections"], 1);
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let app = TestApp::new();

    let (status, _) = app.request("GET", "/metrics", None, None).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let app = TestApp::new();

    let (status, _) = app
        .request("GET", "/api/v1/chats/1/messages", None, None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn api_rejects_token_signed_with_another_secret() {
    let app = TestApp::new();
    let forged = chat_relay::application::services::JwtAuthService::new(
        "some-other-secret-that-is-long-enough-0000",
    )
    .issue_token(1, chrono::Duration::minutes(5))
    .unwrap();

    let (status, _) = app
        .request("GET", "/api/v1/chats/1/messages", Some(&forged), None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn websocket_upgrade_requires_token() {
    let app = TestApp::new();

    let (status, _) = app.request("GET", "/ws", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
