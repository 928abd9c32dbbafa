//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// Redis backplane configuration
    pub redis: RedisSettings,

    /// JWT verification settings
    pub jwt: JwtSettings,

    /// WebSocket transport configuration
    pub websocket: WebSocketSettings,

    /// Typing indicator configuration
    pub typing: TypingSettings,

    /// Snowflake ID generator settings
    pub snowflake: SnowflakeSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Current environment (development, staging, production)
    pub environment: String,

    /// Log output format: "pretty" or "json"
    pub log_format: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,

    /// Apply embedded migrations on startup
    pub run_migrations: bool,
}

/// Redis backplane configuration.
///
/// When `enabled` is false, or Redis cannot be reached at startup, the
/// gateway runs in single-process mode.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub enabled: bool,

    /// Redis connection URL
    pub url: String,

    /// Pub/sub channel shared by every gateway instance
    pub channel: String,

    /// Seconds to wait for the initial connection before falling back
    pub connect_timeout_secs: u64,
}

/// JWT verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key used to verify (and, for tooling, sign) tokens
    pub secret: String,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Interval between server pings in milliseconds (default: 25000)
    pub ping_interval_ms: u64,

    /// How long to wait for a pong before dropping the connection (default: 20000)
    pub ping_timeout_ms: u64,

    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Maximum frame size in bytes (default: 16KB)
    pub max_frame_size: usize,
}

/// Typing indicator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TypingSettings {
    /// Inactivity window after which a typing indicator expires
    pub ttl_ms: u64,

    /// How often the server sweeps expired indicators
    pub sweep_interval_ms: u64,
}

/// Snowflake ID generator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeSettings {
    /// Machine/worker ID (0-31)
    pub machine_id: u16,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. Built-in defaults
    /// 2. config/default.toml (base configuration)
    /// 3. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 4. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the JWT secret is missing or too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("log_format", "pretty")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("database.run_migrations", true)?
            .set_default("redis.enabled", true)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("redis.channel", "chat-relay:events")?
            .set_default("redis.connect_timeout_secs", 3)?
            .set_default("websocket.ping_interval_ms", 25000_i64)?
            .set_default("websocket.ping_timeout_ms", 20000_i64)?
            .set_default("websocket.max_message_size", 65536_i64)?
            .set_default("websocket.max_frame_size", 16384_i64)?
            .set_default("typing.ttl_ms", 3000_i64)?
            .set_default("typing.sweep_interval_ms", 1000_i64)?
            .set_default("snowflake.machine_id", 1)?
            .set_default("cors.allowed_origins", vec!["http://localhost:5173"])?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                settings.validate()?;
                Ok(settings)
            })
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }
        if self.websocket.ping_interval_ms == 0 || self.websocket.ping_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "WebSocket ping interval and timeout must be greater than zero".into(),
            ));
        }
        if self.typing.ttl_ms == 0 {
            return Err(ConfigError::Message("Typing TTL must be greater than zero".into()));
        }
        Ok(())
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl TypingSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
            max_message_size: 64 * 1024,
            max_frame_size: 16 * 1024,
        }
    }
}

impl Default for TypingSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 3_000,
            sweep_interval_ms: 1_000,
        }
    }
}

#[cfg(test)]
impl Settings {
    /// Local settings for unit tests: Redis off, no migrations.
    pub(crate) fn for_tests() -> Self {
        Settings {
            server: ServerSettings {
                host: "127.0.0.1".into(),
                port: 3000,
            },
            database: DatabaseSettings {
                url: "postgres://localhost/test".into(),
                max_connections: 1,
                min_connections: 1,
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
                secret: "unit-test-secret-0123456789abcdefghij".into(),
            },
            websocket: WebSocketSettings::default(),
            typing: TypingSettings::default(),
            snowflake: SnowflakeSettings { machine_id: 1 },
            cors: CorsSettings {
                allowed_origins: vec![],
            },
            environment: "test".into(),
            log_format: "pretty".into(),
        }
    }
}
