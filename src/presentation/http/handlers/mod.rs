//! HTTP Handlers
//!
//! Request handlers for all HTTP endpoints.

pub mod call;
pub mod health;
pub mod message;
pub mod presence;
pub mod receipt;

use crate::shared::error::AppError;

/// Parse a snowflake path segment.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid {} ID", what)))
}
