//! Call Service
//!
//! Relays WebRTC signaling between two members of a chat. SDP and ICE
//! payloads pass through untouched; the service only checks that both
//! parties may talk and keeps one session per calling pair to answer "busy".
//!
//! Sessions live on the instance that handled the offer. Signals arriving
//! on another instance fall back to a membership check, so relaying works
//! across instances while busy detection is per instance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::{
    Audience, CallLog, CallRepository, CallSession, CallSignalPayload, EventPublisher,
    MembershipRepository, PresenceCounter, RealtimeEvent, UnavailableReason,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

/// Default page size for call history.
pub const CALL_HISTORY_LIMIT: i64 = 50;

/// Signaling frames relayed between the two peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Answer,
    IceCandidate,
    Reject,
    End,
}

impl SignalKind {
    fn into_event(self, payload: CallSignalPayload) -> RealtimeEvent {
        match self {
            Self::Answer => RealtimeEvent::CallAnswer(payload),
            Self::IceCandidate => RealtimeEvent::CallIceCandidate(payload),
            Self::Reject => RealtimeEvent::CallReject(payload),
            Self::End => RealtimeEvent::CallEnd(payload),
        }
    }
}

/// Result of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Relayed,
    Unavailable(UnavailableReason),
}

/// Call service errors
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Cannot call yourself")]
    InvalidPeer,

    #[error("Both parties must be members of the chat")]
    Forbidden,

    #[error("Caller is already in another call")]
    AlreadyInCall,

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl From<CallError> for AppError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::InvalidPeer => AppError::BadRequest("Cannot call yourself".into()),
            CallError::Forbidden => AppError::Forbidden("Not a member of this chat".into()),
            CallError::AlreadyInCall => AppError::BadRequest("Already in another call".into()),
            CallError::Persistence(msg) => AppError::Internal(msg),
        }
    }
}

/// Chat plus the two parties, lower id first.
type SessionKey = (i64, i64, i64);

fn session_key(chat_id: i64, a: i64, b: i64) -> SessionKey {
    (chat_id, a.min(b), a.max(b))
}

pub struct CallService<Mem, C>
where
    Mem: MembershipRepository + ?Sized,
    C: CallRepository + ?Sized,
{
    sessions: Mutex<HashMap<SessionKey, CallSession>>,
    member_repo: Arc<Mem>,
    call_repo: Arc<C>,
    counter: Arc<dyn PresenceCounter>,
    publisher: Arc<dyn EventPublisher>,
    id_generator: Arc<SnowflakeGenerator>,
}

impl<Mem, C> CallService<Mem, C>
where
    Mem: MembershipRepository + ?Sized,
    C: CallRepository + ?Sized,
{
    pub fn new(
        member_repo: Arc<Mem>,
        call_repo: Arc<C>,
        counter: Arc<dyn PresenceCounter>,
        publisher: Arc<dyn EventPublisher>,
        id_generator: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            member_repo,
            call_repo,
            counter,
            publisher,
            id_generator,
        }
    }

    /// Place a call. An unavailable callee is reported to the calling
    /// connection only.
    pub async fn offer(
        &self,
        connection_id: Uuid,
        caller_id: i64,
        signal: CallSignalPayload,
    ) -> Result<OfferOutcome, CallError> {
        let chat_id = signal.chat_id;
        let callee_id = signal.peer_id;
        if caller_id == callee_id {
            return Err(CallError::InvalidPeer);
        }
        self.ensure_members(chat_id, caller_id, callee_id).await?;

        let online = self
            .counter
            .count(callee_id)
            .await
            .map_err(|e| persistence("presence_count", e))?
            > 0;
        if !online {
            self.unavailable(connection_id, chat_id, callee_id, UnavailableReason::Offline);
            return Ok(OfferOutcome::Unavailable(UnavailableReason::Offline));
        }

        let video = signal.video.unwrap_or(false);
        let key = session_key(chat_id, caller_id, callee_id);
        {
            let mut sessions = self.sessions.lock();
            // A re-offer within the same session renegotiates it.
            let elsewhere = |user_id: i64| {
                sessions
                    .iter()
                    .any(|(k, s)| *k != key && s.involves(user_id))
            };
            if elsewhere(caller_id) {
                return Err(CallError::AlreadyInCall);
            }
            if elsewhere(callee_id) {
                drop(sessions);
                self.unavailable(connection_id, chat_id, callee_id, UnavailableReason::Busy);
                return Ok(OfferOutcome::Unavailable(UnavailableReason::Busy));
            }
            sessions.insert(key, CallSession::new(chat_id, caller_id, callee_id, video));
        }

        tracing::debug!(chat_id, caller_id, callee_id, video, "Relaying call offer");
        self.publisher.publish(
            Audience::user(callee_id),
            RealtimeEvent::CallOffer(CallSignalPayload {
                chat_id,
                peer_id: caller_id,
                offer: signal.offer,
                video: Some(video),
                ..Default::default()
            }),
        );
        Ok(OfferOutcome::Relayed)
    }

    /// Relay answer, ICE candidate, reject or end to the peer.
    pub async fn relay(
        &self,
        kind: SignalKind,
        sender_id: i64,
        signal: CallSignalPayload,
    ) -> Result<(), CallError> {
        let chat_id = signal.chat_id;
        let peer_id = signal.peer_id;
        if sender_id == peer_id {
            return Err(CallError::InvalidPeer);
        }

        let key = session_key(chat_id, sender_id, peer_id);
        let in_session = self.sessions.lock().contains_key(&key);
        if !in_session {
            self.ensure_members(chat_id, sender_id, peer_id).await?;
        }

        let ended = match kind {
            SignalKind::Answer => {
                if let Some(session) = self.sessions.lock().get_mut(&key) {
                    session.answered_at.get_or_insert_with(Utc::now);
                }
                None
            }
            SignalKind::Reject | SignalKind::End => self.sessions.lock().remove(&key),
            SignalKind::IceCandidate => None,
        };

        if let (Some(session), Some(duration_secs)) = (ended, signal.duration_secs) {
            self.record_call(&session, duration_secs).await;
        }

        self.publisher.publish(
            Audience::user(peer_id),
            kind.into_event(CallSignalPayload {
                peer_id: sender_id,
                ..signal
            }),
        );
        Ok(())
    }

    /// End every call of a user whose last connection closed.
    pub fn end_for_user(&self, user_id: i64) -> usize {
        let ended: Vec<CallSession> = {
            let mut sessions = self.sessions.lock();
            let keys: Vec<SessionKey> = sessions
                .iter()
                .filter(|(_, s)| s.involves(user_id))
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|k| sessions.remove(k)).collect()
        };

        for session in &ended {
            if let Some(peer_id) = session.peer_of(user_id) {
                tracing::debug!(chat_id = session.chat_id, user_id, peer_id, "Ending call on disconnect");
                self.publisher.publish(
                    Audience::user(peer_id),
                    RealtimeEvent::CallEnd(CallSignalPayload {
                        chat_id: session.chat_id,
                        peer_id: user_id,
                        reason: Some("disconnected".into()),
                        ..Default::default()
                    }),
                );
            }
        }
        ended.len()
    }

    /// Post-call records of a chat, for members only.
    pub async fn history(&self, chat_id: i64, viewer_id: i64) -> Result<Vec<CallLog>, CallError> {
        let is_member = self
            .member_repo
            .is_member(chat_id, viewer_id)
            .await
            .map_err(|e| persistence("membership_lookup", e))?;
        if !is_member {
            return Err(CallError::Forbidden);
        }

        self.call_repo
            .find_by_chat(chat_id, CALL_HISTORY_LIMIT)
            .await
            .map_err(|e| persistence("call_history", e))
    }

    /// The session a user is part of in a chat, if any.
    pub fn active_session(&self, chat_id: i64, user_id: i64) -> Option<CallSession> {
        self.sessions
            .lock()
            .values()
            .find(|s| s.chat_id == chat_id && s.involves(user_id))
            .cloned()
    }

    async fn ensure_members(&self, chat_id: i64, a: i64, b: i64) -> Result<(), CallError> {
        for user_id in [a, b] {
            let is_member = self
                .member_repo
                .is_member(chat_id, user_id)
                .await
                .map_err(|e| persistence("membership_lookup", e))?;
            if !is_member {
                return Err(CallError::Forbidden);
            }
        }
        Ok(())
    }

    async fn record_call(&self, session: &CallSession, duration_secs: u32) {
        let log = CallLog {
            id: self.id_generator.generate(),
            chat_id: session.chat_id,
            caller_id: session.caller_id,
            callee_id: session.callee_id,
            video: session.video,
            duration_secs: i32::try_from(duration_secs).unwrap_or(i32::MAX),
            ended_at: Utc::now(),
        };
        if let Err(e) = self.call_repo.record(&log).await {
            metrics::record_persistence_failure("call_record");
            tracing::warn!(chat_id = session.chat_id, error = %e, "Failed to record call");
        }
    }

    fn unavailable(&self, connection_id: Uuid, chat_id: i64, callee_id: i64, reason: UnavailableReason) {
        tracing::debug!(chat_id, callee_id, reason = reason.as_str(), "Callee unavailable");
        self.publisher.publish(
            Audience::connection(connection_id),
            RealtimeEvent::CallUnavailable(CallSignalPayload {
                chat_id,
                peer_id: callee_id,
                reason: Some(reason.as_str().to_string()),
                ..Default::default()
            }),
        );
    }
}

fn persistence(operation: &'static str, err: AppError) -> CallError {
    metrics::record_persistence_failure(operation);
    tracing::error!(operation, error = %err, "Call store operation failed");
    CallError::Persistence(err.to_string())
}
