//! WebSocket Connection Handler
//!
//! Lifecycle of one socket: handshake (token checked by middleware, rooms
//! looked up before the upgrade), `ready`, presence, a read loop with
//! server-driven ping/pong, and cleanup on close or missed pong.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        Extension, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, timeout, Instant};
use uuid::Uuid;
use validator::Validate;

use super::gateway::Outbound;
use super::messages::{ClientEvent, RawFrame, SocketSendMessage};
use crate::application::services::{
    CallError, MessageError, OfferOutcome, ReceiptError, SignalKind,
};
use crate::domain::{
    AckPayload, Audience, CallSignalPayload, DeliveryStatus, EventPublisher, RealtimeEvent,
    ReadyPayload,
};
use crate::infrastructure::metrics;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Grace period for the writer to flush the close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, AppError> {
    let chat_ids = state
        .memberships
        .chat_ids_for_user(auth.user_id)
        .await
        .map_err(|e| {
            metrics::record_persistence_failure("membership_lookup");
            tracing::error!(user_id = auth.user_id, error = %e, "Membership lookup failed at handshake");
            AppError::Unavailable("Membership lookup failed".into())
        })?;

    let limits = &state.settings.websocket;
    Ok(ws
        .max_message_size(limits.max_message_size)
        .max_frame_size(limits.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state, auth.user_id, chat_ids)))
}

/// Result of one client frame, turned into an `ack` if the client asked.
enum Outcome {
    Ok(Option<serde_json::Value>),
    Failed(&'static str),
    /// Authorization failure: logged, never acknowledged
    Dropped,
}

struct Connection<'a> {
    id: Uuid,
    user_id: i64,
    state: &'a AppState,
}

/// Pong deadline tracking. A deadline is armed by the first unanswered
/// ping and cleared by any inbound traffic.
struct Heartbeat {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Heartbeat {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    fn ping_sent(&mut self, now: Instant) {
        self.deadline.get_or_insert(now + self.timeout);
    }

    fn alive(&mut self) {
        self.deadline = None;
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Register a connection, greet it with `ready` and count it for presence.
pub async fn open_connection(
    state: &AppState,
    connection_id: Uuid,
    user_id: i64,
    chat_ids: &[i64],
    sender: mpsc::UnboundedSender<Outbound>,
) {
    state
        .gateway
        .register(connection_id, user_id, chat_ids, sender);

    let ws_settings = &state.settings.websocket;
    state.gateway.publish(
        Audience::connection(connection_id),
        RealtimeEvent::Ready(ReadyPayload {
            user_id,
            connection_id,
            chat_ids: chat_ids.iter().map(ToString::to_string).collect(),
            ping_interval_ms: ws_settings.ping_interval_ms,
            ping_timeout_ms: ws_settings.ping_timeout_ms,
            typing_ttl_ms: state.typing.ttl().as_millis() as u64,
        }),
    );

    if let Err(e) = state.presence.connected(user_id, chat_ids).await {
        tracing::warn!(user_id, error = %e, "Presence update on connect failed");
    }

    tracing::info!(user_id, connection_id = %connection_id, "User connected");
}

/// Unregister a connection. When it was the user's last one, the user goes
/// offline and their typing indicators and calls end.
pub async fn close_connection(
    state: &AppState,
    connection_id: Uuid,
    user_id: i64,
    known_rooms: Vec<i64>,
) {
    let rooms = state
        .gateway
        .unregister(connection_id)
        .map(|client| client.rooms())
        .unwrap_or(known_rooms);

    match state.presence.disconnected(user_id, &rooms).await {
        Ok(true) => {
            let typing = state.typing.clear_user(user_id);
            let calls = state.calls.end_for_user(user_id);
            tracing::debug!(user_id, typing, calls, "Cleared state of offline user");
        }
        Ok(false) => {}
        Err(e) => tracing::warn!(user_id, error = %e, "Presence update on disconnect failed"),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: i64, chat_ids: Vec<i64>) {
    let connection_id = Uuid::new_v4();
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let writer = tokio::spawn(write_loop(sink, rx));

    open_connection(&state, connection_id, user_id, &chat_ids, tx.clone()).await;

    let conn = Connection {
        id: connection_id,
        user_id,
        state: &state,
    };

    let ws_settings = &state.settings.websocket;
    let ping_every = ws_settings.ping_interval();
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);
    let mut heartbeat = Heartbeat::new(ws_settings.ping_timeout());

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.alive();
                        conn.dispatch(text.as_str()).await;
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat.alive(),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(connection_id = %connection_id, "Connection closed");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(connection_id = %connection_id, "Ignoring binary frame");
                    }
                    // Pings are answered by the transport
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                heartbeat.ping_sent(Instant::now());
                if tx.send(Outbound::Ping).is_err() {
                    break;
                }
            }

            _ = wait_for(heartbeat.deadline()) => {
                tracing::info!(connection_id = %connection_id, user_id, "Pong timeout, closing connection");
                break;
            }
        }
    }

    close_connection(&state, connection_id, user_id, chat_ids).await;

    let _ = tx.send(Outbound::Close);
    drop(tx);
    if timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Writer did not drain in time");
    }

    tracing::info!(user_id, connection_id = %connection_id, "User disconnected");
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = rx.recv().await {
        let message = match item {
            Outbound::Frame(frame) => Message::Text(frame.to_string().into()),
            Outbound::Ping => Message::Ping(Bytes::new()),
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

impl Connection<'_> {
    async fn dispatch(&self, text: &str) {
        let raw: RawFrame = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Unparseable frame");
                return;
            }
        };
        let ack = raw.ack;

        let outcome = match ClientEvent::decode(&raw.event, raw.data) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Rejected frame");
                Outcome::Failed(e.code())
            }
        };

        match outcome {
            Outcome::Dropped => {
                tracing::warn!(
                    connection_id = %self.id,
                    user_id = self.user_id,
                    event = %raw.event,
                    "Unauthorized event dropped"
                );
            }
            Outcome::Ok(data) => self.reply(ack, AckPayload::ok(ack.unwrap_or_default(), data)),
            Outcome::Failed(code) => {
                tracing::debug!(connection_id = %self.id, event = %raw.event, code, "Event failed");
                self.reply(ack, AckPayload::error(ack.unwrap_or_default(), code));
            }
        }
    }

    fn reply(&self, ack: Option<u64>, payload: AckPayload) {
        if ack.is_some() {
            self.state
                .gateway
                .publish(Audience::connection(self.id), RealtimeEvent::Ack(payload));
        }
    }

    async fn handle(&self, event: ClientEvent) -> Outcome {
        match event {
            ClientEvent::MessageSend(send) => self.send_message(send).await,
            ClientEvent::Receipt(target, status) => self.receipt(target.message_id, status).await,
            ClientEvent::TypingStart(target) => {
                if !self.in_room(target.chat_id) {
                    return Outcome::Dropped;
                }
                self.state.typing.start(target.chat_id, self.user_id);
                Outcome::Ok(None)
            }
            ClientEvent::TypingStop(target) => {
                if !self.in_room(target.chat_id) {
                    return Outcome::Dropped;
                }
                self.state.typing.stop(target.chat_id, self.user_id);
                Outcome::Ok(None)
            }
            ClientEvent::ChatJoin(target) => self.join(target.chat_id).await,
            ClientEvent::CallOffer(signal) => self.offer(signal).await,
            ClientEvent::CallAnswer(signal) => self.relay(SignalKind::Answer, signal).await,
            ClientEvent::CallIceCandidate(signal) => {
                self.relay(SignalKind::IceCandidate, signal).await
            }
            ClientEvent::CallReject(signal) => self.relay(SignalKind::Reject, signal).await,
            ClientEvent::CallEnd(signal) => self.relay(SignalKind::End, signal).await,
        }
    }

    fn in_room(&self, chat_id: i64) -> bool {
        self.state.gateway.connection_in_room(self.id, chat_id)
    }

    async fn send_message(&self, send: SocketSendMessage) -> Outcome {
        if send.validate().is_err() {
            return Outcome::Failed("validation_failed");
        }
        let dto = send.body.into_dto(send.chat_id);

        match self.state.messages.send(self.user_id, dto).await {
            Ok(message) => Outcome::Ok(Some(json!({ "id": message.id.to_string() }))),
            Err(MessageError::Forbidden) => Outcome::Dropped,
            Err(MessageError::NotFound) => Outcome::Failed("not_found"),
            Err(MessageError::Validation(_)) => Outcome::Failed("validation_failed"),
            Err(MessageError::Persistence(_)) => Outcome::Failed("persistence_failed"),
        }
    }

    async fn receipt(&self, message_id: i64, status: DeliveryStatus) -> Outcome {
        match self
            .state
            .receipts
            .acknowledge(self.user_id, message_id, status)
            .await
        {
            Ok(result) => Outcome::Ok(Some(json!({
                "status": result.record.status,
                "changed": result.changed,
            }))),
            Err(ReceiptError::NotRecipient) => Outcome::Dropped,
            Err(ReceiptError::InvalidStatus) => Outcome::Failed("invalid_status"),
            Err(ReceiptError::Persistence(_)) => Outcome::Failed("persistence_failed"),
        }
    }

    async fn join(&self, chat_id: i64) -> Outcome {
        match self.state.memberships.is_member(chat_id, self.user_id).await {
            Ok(true) => {
                self.state.gateway.join_room(self.id, chat_id);
                tracing::debug!(connection_id = %self.id, chat_id, "Joined room");
                Outcome::Ok(Some(json!({ "chatId": chat_id.to_string() })))
            }
            Ok(false) => Outcome::Dropped,
            Err(e) => {
                metrics::record_persistence_failure("membership_lookup");
                tracing::error!(chat_id, user_id = self.user_id, error = %e, "Membership check failed");
                Outcome::Failed("persistence_failed")
            }
        }
    }

    async fn offer(&self, signal: CallSignalPayload) -> Outcome {
        match self.state.calls.offer(self.id, self.user_id, signal).await {
            Ok(OfferOutcome::Relayed) => Outcome::Ok(Some(json!({ "status": "relayed" }))),
            Ok(OfferOutcome::Unavailable(reason)) => Outcome::Ok(Some(json!({
                "status": "unavailable",
                "reason": reason.as_str(),
            }))),
            Err(e) => call_failure(e),
        }
    }

    async fn relay(&self, kind: SignalKind, signal: CallSignalPayload) -> Outcome {
        match self.state.calls.relay(kind, self.user_id, signal).await {
            Ok(()) => Outcome::Ok(None),
            Err(e) => call_failure(e),
        }
    }
}

fn call_failure(err: CallError) -> Outcome {
    match err {
        CallError::Forbidden => Outcome::Dropped,
        CallError::InvalidPeer => Outcome::Failed("invalid_peer"),
        CallError::AlreadyInCall => Outcome::Failed("already_in_call"),
        CallError::Persistence(_) => Outcome::Failed("persistence_failed"),
    }
}
