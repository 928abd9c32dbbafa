//! Delivery records: per-(message, recipient) transit status.
//!
//! Status only moves forward: `sent -> delivered -> read`. A report that
//! would not move it forward is a no-op, and `read` may arrive before
//! `delivered`, in which case both timestamps are stamped at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Delivery status, ordered by progress.
///
/// Stored as a SMALLINT rank so the database can enforce monotonicity with
/// a plain `status < $new` predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn rank(self) -> i16 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    pub fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            0 => Some(Self::Sent),
            1 => Some(Self::Delivered),
            2 => Some(Self::Read),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery state of one message for one recipient.
///
/// Maps to `message_deliveries` (joined with `messages` for `chat_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// Fresh record written alongside the message.
    pub fn sent(message_id: i64, chat_id: i64, user_id: i64) -> Self {
        Self {
            message_id,
            chat_id,
            user_id,
            status: DeliveryStatus::Sent,
            delivered_at: None,
            read_at: None,
        }
    }

    /// Apply a client report.
    ///
    /// Returns the advanced record, or `None` when the report does not move
    /// the status forward.
    pub fn advance(&self, reported: DeliveryStatus, at: DateTime<Utc>) -> Option<Self> {
        if reported <= self.status {
            return None;
        }

        let mut next = self.clone();
        next.status = reported;
        if reported >= DeliveryStatus::Delivered && next.delivered_at.is_none() {
            next.delivered_at = Some(at);
        }
        if reported == DeliveryStatus::Read && next.read_at.is_none() {
            next.read_at = Some(at);
        }
        Some(next)
    }

    /// Timestamp of the current status.
    pub fn status_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            DeliveryStatus::Sent => None,
            DeliveryStatus::Delivered => self.delivered_at,
            DeliveryStatus::Read => self.read_at,
        }
    }
}

/// Result of applying a delivery report in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Status moved forward and was persisted.
    Advanced(DeliveryRecord),
    /// Record exists but was already at or past the reported status.
    Unchanged(DeliveryRecord),
    /// No delivery record exists for this (message, user) pair.
    NotRecipient,
}

/// Repository trait for delivery records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Conditionally advance a record; never regresses.
    async fn advance(
        &self,
        message_id: i64,
        user_id: i64,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, AppError>;

    async fn find(&self, message_id: i64, user_id: i64) -> Result<Option<DeliveryRecord>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn record(status: DeliveryStatus) -> DeliveryRecord {
        let mut r = DeliveryRecord::sent(10, 20, 30);
        let t = Utc::now();
        r.status = status;
        if status >= DeliveryStatus::Delivered {
            r.delivered_at = Some(t);
        }
        if status == DeliveryStatus::Read {
            r.read_at = Some(t);
        }
        r
    }

    #[test_case(DeliveryStatus::Sent, DeliveryStatus::Delivered, Some(DeliveryStatus::Delivered) ; "sent to delivered")]
    #[test_case(DeliveryStatus::Sent, DeliveryStatus::Read, Some(DeliveryStatus::Read) ; "read before delivered")]
    #[test_case(DeliveryStatus::Delivered, DeliveryStatus::Read, Some(DeliveryStatus::Read) ; "delivered to read")]
    #[test_case(DeliveryStatus::Read, DeliveryStatus::Delivered, None ; "late delivered after read")]
    #[test_case(DeliveryStatus::Delivered, DeliveryStatus::Delivered, None ; "duplicate delivered")]
    #[test_case(DeliveryStatus::Read, DeliveryStatus::Read, None ; "duplicate read")]
    #[test_case(DeliveryStatus::Delivered, DeliveryStatus::Sent, None ; "regression to sent")]
    fn advance_is_monotonic(
        current: DeliveryStatus,
        reported: DeliveryStatus,
        expected: Option<DeliveryStatus>,
    ) {
        let next = record(current).advance(reported, Utc::now());
        assert_eq!(next.map(|r| r.status), expected);
    }

    #[test]
    fn read_before_delivered_stamps_both_timestamps() {
        let at = Utc::now();
        let next = DeliveryRecord::sent(1, 2, 3)
            .advance(DeliveryStatus::Read, at)
            .unwrap();
        assert_eq!(next.delivered_at, Some(at));
        assert_eq!(next.read_at, Some(at));
        assert_eq!(next.status_at(), Some(at));
    }

    #[test]
    fn delivered_timestamp_survives_later_read() {
        let first = Utc::now();
        let delivered = DeliveryRecord::sent(1, 2, 3)
            .advance(DeliveryStatus::Delivered, first)
            .unwrap();
        let later = first + chrono::Duration::seconds(30);
        let read = delivered.advance(DeliveryStatus::Read, later).unwrap();
        assert_eq!(read.delivered_at, Some(first));
        assert_eq!(read.read_at, Some(later));
    }

    #[test]
    fn rank_round_trips() {
        for status in [DeliveryStatus::Sent, DeliveryStatus::Delivered, DeliveryStatus::Read] {
            assert_eq!(DeliveryStatus::from_rank(status.rank()), Some(status));
        }
        assert_eq!(DeliveryStatus::from_rank(7), None);
    }
}
