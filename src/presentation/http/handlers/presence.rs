//! Presence Handlers

use axum::{
    extract::{Path, State},
    Json,
};

use super::parse_id;
use crate::application::dto::response::PresenceResponse;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Live online flag plus persisted last-seen
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>, AppError> {
    let user_id = parse_id(&user_id, "user")?;
    let presence = state.presence.get(user_id).await?;
    Ok(Json(PresenceResponse::from(presence)))
}
