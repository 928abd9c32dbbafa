//! Message Handlers
//!
//! REST side of the message path: history page-fetch for reconnecting
//! clients, plus send/edit/delete that fan out exactly like the socket.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};

use super::parse_id;
use crate::application::dto::request::{EditMessageRequest, HistoryQuery, SendMessageRequest};
use crate::application::dto::response::MessageResponse;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::shared::validation::validate;
use crate::startup::AppState;

/// Get a page of chat history, newest first
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageResponse>>, AppError> {
    let chat_id = parse_id(&chat_id, "chat")?;

    let page = state
        .messages
        .history(chat_id, auth.user_id, query.before, query.limit)
        .await?;

    Ok(Json(page.into_iter().map(MessageResponse::from).collect()))
}

/// Send message to chat
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let chat_id = parse_id(&chat_id, "chat")?;
    validate(&body)?;

    let message = state
        .messages
        .send(auth.user_id, body.into_dto(chat_id))
        .await?;

    Ok((StatusCode::CREATED, Json(MessageResponse::from(message))))
}

/// Edit own message
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let message_id = parse_id(&message_id, "message")?;
    validate(&body)?;

    let message = state
        .messages
        .edit(message_id, auth.user_id, body.content)
        .await?;

    Ok(Json(MessageResponse::from(message)))
}

/// Delete own message
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(message_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let message_id = parse_id(&message_id, "message")?;
    state.messages.delete(message_id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
