//! Common Test Utilities
//!
//! In-memory repositories behind the domain traits, and a `TestApp` that
//! drives the real router with them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use chat_relay::application::services::JwtAuthService;
use chat_relay::config::{
    CorsSettings, DatabaseSettings, JwtSettings, RedisSettings, ServerSettings, Settings,
    SnowflakeSettings, TypingSettings, WebSocketSettings,
};
use chat_relay::domain::{
    AdvanceOutcome, CallLog, CallRepository, DeliveryRecord, DeliveryRepository, DeliveryStatus,
    MembershipRepository, Message, MessageRepository, MessageView, Presence, PresenceRepository,
};
use chat_relay::infrastructure::backplane::{BackplaneMode, LocalPresenceCounter};
use chat_relay::presentation::http::create_router;
use chat_relay::presentation::websocket::{close_connection, open_connection, Gateway, Outbound};
use chat_relay::shared::error::AppError;
use chat_relay::startup::{AppState, Repositories};

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

#[derive(Default)]
struct Tables {
    members: HashMap<i64, Vec<i64>>,
    messages: Vec<Message>,
    deliveries: HashMap<(i64, i64), DeliveryRecord>,
    users: HashMap<i64, Presence>,
    calls: Vec<CallLog>,
}

/// One in-memory store implementing every repository trait.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn add_chat(&self, chat_id: i64, members: &[i64]) {
        let mut tables = self.tables.lock();
        tables.members.insert(chat_id, members.to_vec());
        for user_id in members {
            tables
                .users
                .entry(*user_id)
                .or_insert_with(|| Presence::offline(*user_id));
        }
    }

    pub fn delivery(&self, message_id: i64, user_id: i64) -> Option<DeliveryRecord> {
        self.tables
            .lock()
            .deliveries
            .get(&(message_id, user_id))
            .cloned()
    }

    pub fn message_count(&self) -> usize {
        self.tables.lock().messages.len()
    }

    pub fn add_call_log(&self, log: CallLog) {
        self.tables.lock().calls.push(log);
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn create(&self, message: &Message) -> Result<Message, AppError> {
        let mut tables = self.tables.lock();
        let recipients: Vec<i64> = tables
            .members
            .get(&message.chat_id)
            .map(|m| m.iter().copied().filter(|u| *u != message.sender_id).collect())
            .unwrap_or_default();
        for user_id in recipients {
            tables.deliveries.insert(
                (message.id, user_id),
                DeliveryRecord::sent(message.id, message.chat_id, user_id),
            );
        }
        tables.messages.push(message.clone());
        Ok(message.clone())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Message>, AppError> {
        Ok(self
            .tables
            .lock()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn find_page(
        &self,
        chat_id: i64,
        viewer_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageView>, AppError> {
        let tables = self.tables.lock();
        let mut page: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id && before.map_or(true, |b| m.id < b))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.id.cmp(&a.id));
        page.truncate(limit as usize);

        Ok(page
            .into_iter()
            .map(|message| {
                let status = if message.sender_id == viewer_id {
                    tables
                        .deliveries
                        .values()
                        .filter(|d| d.message_id == message.id)
                        .map(|d| d.status)
                        .min()
                } else {
                    tables
                        .deliveries
                        .get(&(message.id, viewer_id))
                        .map(|d| d.status)
                };
                MessageView { message, status }
            })
            .collect())
    }

    async fn update_content(
        &self,
        id: i64,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Message, AppError> {
        let mut tables = self.tables.lock();
        let message = tables
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound("Message not found".into()))?;
        message.content = content.to_string();
        message.edited_at = Some(edited_at);
        Ok(message.clone())
    }

    async fn soft_delete(&self, id: i64, deleted_at: DateTime<Utc>) -> Result<Message, AppError> {
        let mut tables = self.tables.lock();
        let message = tables
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound("Message not found".into()))?;
        message.deleted_at.get_or_insert(deleted_at);
        Ok(message.clone())
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryStore {
    async fn advance(
        &self,
        message_id: i64,
        user_id: i64,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, AppError> {
        let mut tables = self.tables.lock();
        let Some(record) = tables.deliveries.get_mut(&(message_id, user_id)) else {
            return Ok(AdvanceOutcome::NotRecipient);
        };
        Ok(match record.advance(status, at) {
            Some(next) => {
                *record = next.clone();
                AdvanceOutcome::Advanced(next)
            }
            None => AdvanceOutcome::Unchanged(record.clone()),
        })
    }

    async fn find(&self, message_id: i64, user_id: i64) -> Result<Option<DeliveryRecord>, AppError> {
        Ok(self.delivery(message_id, user_id))
    }
}

#[async_trait]
impl MembershipRepository for InMemoryStore {
    async fn chat_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self
            .tables
            .lock()
            .members
            .iter()
            .filter(|(_, members)| members.contains(&user_id))
            .map(|(chat_id, _)| *chat_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn is_member(&self, chat_id: i64, user_id: i64) -> Result<bool, AppError> {
        Ok(self
            .tables
            .lock()
            .members
            .get(&chat_id)
            .map_or(false, |m| m.contains(&user_id)))
    }

    async fn member_ids(&self, chat_id: i64) -> Result<Vec<i64>, AppError> {
        Ok(self
            .tables
            .lock()
            .members
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl PresenceRepository for InMemoryStore {
    async fn mark_online(&self, user_id: i64) -> Result<(), AppError> {
        let mut tables = self.tables.lock();
        let presence = tables
            .users
            .entry(user_id)
            .or_insert_with(|| Presence::offline(user_id));
        presence.is_online = true;
        Ok(())
    }

    async fn mark_offline(&self, user_id: i64, last_seen_at: DateTime<Utc>) -> Result<(), AppError> {
        let mut tables = self.tables.lock();
        let presence = tables
            .users
            .entry(user_id)
            .or_insert_with(|| Presence::offline(user_id));
        presence.is_online = false;
        presence.last_seen_at = Some(last_seen_at);
        Ok(())
    }

    async fn find(&self, user_id: i64) -> Result<Option<Presence>, AppError> {
        Ok(self.tables.lock().users.get(&user_id).cloned())
    }
}

#[async_trait]
impl CallRepository for InMemoryStore {
    async fn record(&self, log: &CallLog) -> Result<(), AppError> {
        self.tables.lock().calls.push(log.clone());
        Ok(())
    }

    async fn find_by_chat(&self, chat_id: i64, limit: i64) -> Result<Vec<CallLog>, AppError> {
        let mut logs: Vec<CallLog> = self
            .tables
            .lock()
            .calls
            .iter()
            .filter(|c| c.chat_id == chat_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        logs.truncate(limit as usize);
        Ok(logs)
    }
}

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseSettings {
            url: "postgres://unused".into(),
            max_connections: 1,
            min_connections: 0,
            acquire_timeout: 1,
            run_migrations: false,
        },
        redis: RedisSettings {
            enabled: false,
            url: "redis://127.0.0.1:6379".into(),
            channel: "test".into(),
            connect_timeout_secs: 1,
        },
        jwt: JwtSettings {
            secret: TEST_SECRET.into(),
        },
        websocket: WebSocketSettings::default(),
        typing: TypingSettings::default(),
        snowflake: SnowflakeSettings { machine_id: 7 },
        cors: CorsSettings {
            allowed_origins: vec![],
        },
        environment: "test".into(),
        log_format: "pretty".into(),
    }
}

/// Test application over the in-memory store
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    /// Open fake sockets: owner and rooms at connect time
    sockets: Mutex<HashMap<Uuid, (i64, Vec<i64>)>>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::default());
        let repos = Repositories {
            messages: store.clone(),
            deliveries: store.clone(),
            memberships: store.clone(),
            presence: store.clone(),
            calls: store.clone(),
        };
        let state = AppState::new(
            Arc::new(test_settings()),
            Arc::new(Gateway::single_process()),
            repos,
            Arc::new(LocalPresenceCounter::new()),
            BackplaneMode::SingleProcess,
        );

        Self {
            router: create_router(state.clone()),
            state,
            store,
            sockets: Mutex::new(HashMap::new()),
        }
    }

    pub fn token_for(&self, user_id: i64) -> String {
        JwtAuthService::new(TEST_SECRET)
            .issue_token(user_id, chrono::Duration::minutes(5))
            .unwrap()
    }

    /// Attach a fake socket for `user_id` the way the socket handler does,
    /// joined to the user's chats, and return its outbound queue.
    pub async fn connect(&self, user_id: i64) -> (Uuid, mpsc::UnboundedReceiver<Outbound>) {
        let chats = self.store.chat_ids_for_user(user_id).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        open_connection(&self.state, id, user_id, &chats, tx).await;
        self.sockets.lock().insert(id, (user_id, chats));
        (id, rx)
    }

    /// Detach a fake socket through the handler's close path.
    pub async fn disconnect(&self, connection_id: Uuid) {
        let Some((user_id, chats)) = self.sockets.lock().remove(&connection_id) else {
            return;
        };
        close_connection(&self.state, connection_id, user_id, chats).await;
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }
}

/// Decoded frames queued for a fake socket so far.
pub fn drain_frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(item) = rx.try_recv() {
        if let Outbound::Frame(frame) = item {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
    }
    frames
}

/// Frames of one event name.
pub fn events_named<'a>(
    frames: &'a [serde_json::Value],
    name: &'a str,
) -> impl Iterator<Item = &'a serde_json::Value> + 'a {
    frames.iter().filter(move |f| f["event"] == name)
}
