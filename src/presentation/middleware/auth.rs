//! Authentication Middleware
//!
//! Bearer token validation for REST routes and the WebSocket handshake.

use axum::{
    extract::{Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use serde::Deserialize;

use crate::shared::error::AppError;
use crate::startup::AppState;

/// Authenticated user extension
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing or malformed bearer token".into()))?;

    let user_id = state.auth.verify_token(&token)?;
    request.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(request).await)
}

/// Handshake authentication. Browsers cannot set headers on a WebSocket
/// request, so the token may also come from `?token=`. Rejects with 401
/// before the upgrade happens.
pub async fn ws_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let from_query = Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty());

    let token = match from_query {
        Some(token) => token,
        None => bearer_token(request.headers())
            .ok_or_else(|| AppError::Unauthorized("Missing token".into()))?,
    };

    let user_id = state.auth.verify_token(&token).map_err(|e| {
        tracing::debug!(error = %e, "Handshake rejected");
        AppError::from(e)
    })?;
    request.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_owned())
}
