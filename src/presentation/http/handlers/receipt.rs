//! Receipt Handlers

use axum::{
    extract::{Extension, Path, State},
    Json,
};

use super::parse_id;
use crate::application::dto::request::ReceiptRequest;
use crate::application::dto::response::ReceiptResponse;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Report delivery or read of a message. Same state machine as the
/// socket acknowledgment; stale reports return the stored state.
pub async fn acknowledge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(message_id): Path<String>,
    Json(body): Json<ReceiptRequest>,
) -> Result<Json<ReceiptResponse>, AppError> {
    let message_id = parse_id(&message_id, "message")?;

    let result = state
        .receipts
        .acknowledge(auth.user_id, message_id, body.status)
        .await?;

    Ok(Json(ReceiptResponse::from(result)))
}
