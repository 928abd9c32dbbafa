//! Application Startup
//!
//! Wires storage, backplane, gateway and services together, then serves
//! HTTP and WebSocket traffic until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use futures::StreamExt;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use uuid::Uuid;

use crate::application::services::{
    AuthService, CallService, JwtAuthService, MessageService, MessageServiceImpl, PresenceService,
    ReceiptService, ReceiptServiceImpl, TypingService,
};
use crate::config::Settings;
use crate::domain::{
    CallRepository, DeliveryRepository, EventPublisher, MembershipRepository, MessageRepository,
    PresenceCounter, PresenceRepository,
};
use crate::infrastructure::backplane::{
    create_redis_client, Backplane, BackplaneEnvelope, BackplaneForwarder, BackplaneMode,
    LocalPresenceCounter, RedisBackplane, RedisPresenceCounter,
};
use crate::infrastructure::database;
use crate::infrastructure::repositories::{
    PgCallRepository, PgDeliveryRepository, PgMembershipRepository, PgMessageRepository,
    PgPresenceRepository,
};
use crate::presentation::http::{create_router, handlers};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::Gateway;
use crate::shared::snowflake::SnowflakeGenerator;

pub type AppPresenceService = PresenceService<dyn PresenceRepository>;
pub type AppCallService = CallService<dyn MembershipRepository, dyn CallRepository>;

/// Backplane resubscribe backoff bounds
const RESUBSCRIBE_MIN: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Storage collaborators behind their domain traits.
#[derive(Clone)]
pub struct Repositories {
    pub messages: Arc<dyn MessageRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub presence: Arc<dyn PresenceRepository>,
    pub calls: Arc<dyn CallRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            messages: Arc::new(PgMessageRepository::new(pool.clone())),
            deliveries: Arc::new(PgDeliveryRepository::new(pool.clone())),
            memberships: Arc::new(PgMembershipRepository::new(pool.clone())),
            presence: Arc::new(PgPresenceRepository::new(pool.clone())),
            calls: Arc::new(PgCallRepository::new(pool)),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub gateway: Arc<Gateway>,
    pub auth: Arc<dyn AuthService>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub messages: Arc<dyn MessageService>,
    pub receipts: Arc<dyn ReceiptService>,
    pub presence: Arc<AppPresenceService>,
    pub typing: Arc<TypingService>,
    pub calls: Arc<AppCallService>,
    /// Absent when the state is built over non-Postgres repositories
    pub db: Option<PgPool>,
    pub backplane_mode: BackplaneMode,
}

impl AppState {
    /// Build every service over the given collaborators. The gateway is the
    /// event publisher for all of them.
    pub fn new(
        settings: Arc<Settings>,
        gateway: Arc<Gateway>,
        repos: Repositories,
        counter: Arc<dyn PresenceCounter>,
        backplane_mode: BackplaneMode,
    ) -> Self {
        let publisher: Arc<dyn EventPublisher> = gateway.clone();
        let snowflake = Arc::new(SnowflakeGenerator::new(settings.snowflake.machine_id));

        let messages = Arc::new(MessageServiceImpl::new(
            repos.messages.clone(),
            repos.memberships.clone(),
            publisher.clone(),
            snowflake.clone(),
        ));
        let receipts = Arc::new(ReceiptServiceImpl::new(
            repos.deliveries.clone(),
            publisher.clone(),
        ));
        let presence = Arc::new(PresenceService::new(
            counter.clone(),
            repos.presence.clone(),
            publisher.clone(),
        ));
        let typing = Arc::new(TypingService::new(settings.typing.ttl(), publisher.clone()));
        let calls = Arc::new(CallService::new(
            repos.memberships.clone(),
            repos.calls.clone(),
            counter,
            publisher,
            snowflake,
        ));

        Self {
            auth: Arc::new(JwtAuthService::new(&settings.jwt.secret)),
            memberships: repos.memberships,
            messages,
            receipts,
            presence,
            typing,
            calls,
            gateway,
            settings,
            db: None,
            backplane_mode,
        }
    }

    pub fn with_db(mut self, pool: PgPool) -> Self {
        self.db = Some(pool);
        self
    }
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    background: Vec<JoinHandle<()>>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        handlers::health::init_server_start();

        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");
        if settings.database.run_migrations {
            database::run_migrations(&db).await?;
            tracing::info!("Database migrations applied");
        }

        let node_id = Uuid::new_v4();
        let mut background = Vec::new();

        let (backplane, counter) = connect_backplane(&settings).await;
        let mode = backplane
            .as_ref()
            .map(|b| b.mode())
            .unwrap_or(BackplaneMode::SingleProcess);
        let forwarder = match &backplane {
            Some(backplane) => {
                let (forwarder, handle) =
                    BackplaneForwarder::spawn(backplane.clone(), settings.redis.channel.clone());
                background.push(handle);
                Some(forwarder)
            }
            None => None,
        };

        let gateway = Arc::new(Gateway::new(node_id, forwarder));
        if let Some(backplane) = backplane {
            background.push(spawn_subscriber(
                backplane,
                settings.redis.channel.clone(),
                gateway.clone(),
            ));
        }

        let settings = Arc::new(settings);
        let state = AppState::new(
            settings.clone(),
            gateway,
            Repositories::postgres(db.clone()),
            counter,
            mode,
        )
        .with_db(db);

        background.push(spawn_typing_sweeper(
            state.typing.clone(),
            settings.typing.sweep_interval(),
        ));

        let router = create_router(state).layer(
            ServiceBuilder::new()
                .layer(logging::create_trace_layer())
                .layer(cors::create_cors_layer(&settings.cors)),
        );

        let listener = TcpListener::bind(settings.server_addr()).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            node_id = %node_id,
            backplane = mode.as_str(),
            "Listening"
        );

        Ok(Self {
            listener,
            router,
            background,
        })
    }

    /// Run the server until Ctrl-C or SIGTERM
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        for handle in self.background {
            handle.abort();
        }
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Redis backplane and counter when enabled and reachable; otherwise
/// single-process mode with one warning.
async fn connect_backplane(
    settings: &Settings,
) -> (Option<Arc<dyn Backplane>>, Arc<dyn PresenceCounter>) {
    let local = || -> Arc<dyn PresenceCounter> { Arc::new(LocalPresenceCounter::new()) };

    if !settings.redis.enabled {
        tracing::info!("Redis disabled, running in single-process mode");
        return (None, local());
    }

    match create_redis_client(&settings.redis).await {
        Ok((client, manager)) => {
            tracing::info!("Redis backplane connected");
            let backplane: Arc<dyn Backplane> =
                Arc::new(RedisBackplane::new(client, manager.clone()));
            (Some(backplane), Arc::new(RedisPresenceCounter::new(manager)))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Redis unreachable, continuing in single-process mode"
            );
            (None, local())
        }
    }
}

/// Deliver envelopes from other instances, resubscribing with backoff when
/// the subscription drops.
fn spawn_subscriber(
    backplane: Arc<dyn Backplane>,
    channel: String,
    gateway: Arc<Gateway>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = RESUBSCRIBE_MIN;
        loop {
            match backplane.subscribe(&channel).await {
                Ok(mut stream) => {
                    tracing::info!(channel = %channel, "Subscribed to backplane");
                    backoff = RESUBSCRIBE_MIN;
                    while let Some(payload) = stream.next().await {
                        match BackplaneEnvelope::decode(&payload) {
                            Ok(envelope) => {
                                gateway.deliver_from_backplane(envelope);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping undecodable backplane envelope")
                            }
                        }
                    }
                    tracing::warn!(channel = %channel, "Backplane subscription ended");
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Backplane subscribe failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RESUBSCRIBE_MAX);
        }
    })
}

fn spawn_typing_sweeper(typing: Arc<TypingService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let swept = typing.sweep_expired();
            if swept > 0 {
                tracing::trace!(swept, "Expired typing indicators");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
