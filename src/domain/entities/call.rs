//! Call sessions and post-call records.
//!
//! Signaling payloads (SDP, ICE candidates) are opaque; only the pair of
//! participants and the chat they share are tracked.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A live signaling exchange between two members of a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub chat_id: i64,
    pub caller_id: i64,
    pub callee_id: i64,
    pub video: bool,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(chat_id: i64, caller_id: i64, callee_id: i64, video: bool) -> Self {
        Self {
            chat_id,
            caller_id,
            callee_id,
            video,
            started_at: Utc::now(),
            answered_at: None,
        }
    }

    pub fn involves(&self, user_id: i64) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    /// The other participant, if `user_id` is one of the two.
    pub fn peer_of(&self, user_id: i64) -> Option<i64> {
        if self.caller_id == user_id {
            Some(self.callee_id)
        } else if self.callee_id == user_id {
            Some(self.caller_id)
        } else {
            None
        }
    }

    /// True when the session connects exactly these two users.
    pub fn is_between(&self, a: i64, b: i64) -> bool {
        self.peer_of(a) == Some(b)
    }
}

/// Why a call could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnavailableReason {
    /// Callee holds no live connection
    Offline,
    /// Callee is already in another call
    Busy,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Busy => "busy",
        }
    }
}

/// Post-call record. Maps to `call_logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLog {
    pub id: i64,
    pub chat_id: i64,
    pub caller_id: i64,
    pub callee_id: i64,
    pub video: bool,
    pub duration_secs: i32,
    pub ended_at: DateTime<Utc>,
}

/// Repository trait for call records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn record(&self, log: &CallLog) -> Result<(), AppError>;

    /// Most recent calls of a chat, newest first.
    async fn find_by_chat(&self, chat_id: i64, limit: i64) -> Result<Vec<CallLog>, AppError>;
}
