//! Call History Handlers

use axum::{
    extract::{Extension, Path, State},
    Json,
};

use super::parse_id;
use crate::application::dto::response::CallLogResponse;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

pub async fn get_call_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<CallLogResponse>>, AppError> {
    let chat_id = parse_id(&chat_id, "chat")?;
    let logs = state.calls.history(chat_id, auth.user_id).await?;
    Ok(Json(logs.into_iter().map(CallLogResponse::from).collect()))
}
