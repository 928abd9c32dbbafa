//! Route Configuration
//!
//! Configures all HTTP routes, the WebSocket endpoint and the probes.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::{auth_middleware, logging, ws_auth_middleware};
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state.clone()))
        // WebSocket endpoint; the token is checked before the upgrade
        .route(
            "/ws",
            get(ws_handler).route_layer(middleware::from_fn_with_state(
                state.clone(),
                ws_auth_middleware,
            )),
        )
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(logging::track_metrics))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// API v1 routes (all protected)
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/chats/{chat_id}/messages",
            get(handlers::message::get_messages).post(handlers::message::send_message),
        )
        .route("/chats/{chat_id}/calls", get(handlers::call::get_call_history))
        .route(
            "/messages/{message_id}",
            patch(handlers::message::edit_message).delete(handlers::message::delete_message),
        )
        .route(
            "/messages/{message_id}/receipts",
            post(handlers::receipt::acknowledge),
        )
        .route("/users/{user_id}/presence", get(handlers::presence::get_presence))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
