//! Receipt Service
//!
//! Applies delivery/read acknowledgments to the per-recipient state machine
//! and broadcasts accepted transitions to the chat room.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{
    AdvanceOutcome, Audience, DeliveryRecord, DeliveryRepository, DeliveryStatus, EventPublisher,
    RealtimeEvent, ReceiptPayload,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// Receipt service trait
#[async_trait]
pub trait ReceiptService: Send + Sync {
    /// Report that `user_id` has received or read `message_id`.
    async fn acknowledge(
        &self,
        user_id: i64,
        message_id: i64,
        status: DeliveryStatus,
    ) -> Result<ReceiptResult, ReceiptError>;
}

/// Stored record after an acknowledgment, and whether it moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptResult {
    pub record: DeliveryRecord,
    pub changed: bool,
}

/// Receipt service errors
#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("Only delivered or read can be reported")]
    InvalidStatus,

    #[error("User is not a recipient of this message")]
    NotRecipient,

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl From<ReceiptError> for AppError {
    fn from(err: ReceiptError) -> Self {
        match err {
            ReceiptError::InvalidStatus => {
                AppError::BadRequest("Only delivered or read can be reported".into())
            }
            ReceiptError::NotRecipient => {
                AppError::Forbidden("Not a recipient of this message".into())
            }
            ReceiptError::Persistence(msg) => AppError::Internal(msg),
        }
    }
}

/// ReceiptService implementation
pub struct ReceiptServiceImpl<D>
where
    D: DeliveryRepository + ?Sized,
{
    delivery_repo: Arc<D>,
    publisher: Arc<dyn EventPublisher>,
}

impl<D> ReceiptServiceImpl<D>
where
    D: DeliveryRepository + ?Sized,
{
    pub fn new(delivery_repo: Arc<D>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            delivery_repo,
            publisher,
        }
    }

    fn broadcast(&self, record: &DeliveryRecord) {
        let at = record.status_at().unwrap_or_else(Utc::now);
        let payload = ReceiptPayload {
            message_id: record.message_id,
            chat_id: record.chat_id,
            user_id: record.user_id,
            at,
        };
        let event = match record.status {
            DeliveryStatus::Delivered => RealtimeEvent::MessageDelivered(payload),
            DeliveryStatus::Read => RealtimeEvent::MessageRead(payload),
            DeliveryStatus::Sent => return,
        };
        self.publisher.publish(Audience::chat(record.chat_id), event);
    }
}

#[async_trait]
impl<D> ReceiptService for ReceiptServiceImpl<D>
where
    D: DeliveryRepository + ?Sized + 'static,
{
    async fn acknowledge(
        &self,
        user_id: i64,
        message_id: i64,
        status: DeliveryStatus,
    ) -> Result<ReceiptResult, ReceiptError> {
        if status == DeliveryStatus::Sent {
            return Err(ReceiptError::InvalidStatus);
        }

        let outcome = self
            .delivery_repo
            .advance(message_id, user_id, status, Utc::now())
            .await
            .map_err(|e| {
                metrics::record_persistence_failure("delivery_advance");
                tracing::error!(message_id, user_id, error = %e, "Failed to persist delivery status");
                ReceiptError::Persistence(e.to_string())
            })?;

        match outcome {
            AdvanceOutcome::Advanced(record) => {
                tracing::debug!(
                    message_id,
                    user_id,
                    status = %record.status,
                    "Delivery status advanced"
                );
                metrics::record_receipt_transition(record.status.as_str());
                self.broadcast(&record);
                Ok(ReceiptResult {
                    record,
                    changed: true,
                })
            }
            AdvanceOutcome::Unchanged(record) => Ok(ReceiptResult {
                record,
                changed: false,
            }),
            AdvanceOutcome::NotRecipient => Err(ReceiptError::NotRecipient),
        }
    }
}
