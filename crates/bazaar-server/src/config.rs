use anyhow::{bail, Result};
use bazaar_core::session_cache::CacheTtls;
use bazaar_core::AppConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub identity: IdentityConfig,
    pub notifications: NotificationsConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    Sqlite,
    Postgres,
}

impl From<DatabaseEngine> for bazaar_db::DatabaseEngine {
    fn from(engine: DatabaseEngine) -> Self {
        match engine {
            DatabaseEngine::Sqlite => bazaar_db::DatabaseEngine::Sqlite,
            DatabaseEngine::Postgres => bazaar_db::DatabaseEngine::Postgres,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: DatabaseEngine,
    pub url: String,
    pub max_connections: u32,
    /// Statement timeout in seconds for PostgreSQL connections (0 = disabled).
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::Sqlite,
            url: "sqlite://./data/bazaar.db?mode=rwc".into(),
            max_connections: 10,
            statement_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process only; presence is not shared between relay instances.
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub presence_ttl_secs: u64,
    pub typing_ttl_secs: u64,
    pub token_ttl_secs: u64,
    pub socket_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            presence_ttl_secs: ttls.presence.as_secs(),
            typing_ttl_secs: ttls.typing.as_secs(),
            token_ttl_secs: ttls.token.as_secs(),
            socket_ttl_secs: ttls.socket.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            presence: Duration::from_secs(self.presence_ttl_secs.max(1)),
            typing: Duration::from_secs(self.typing_ttl_secs.max(1)),
            token: Duration::from_secs(self.token_ttl_secs.max(1)),
            socket: Duration::from_secs(self.socket_ttl_secs.max(1)),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Trust locally decoded tokens while the identity service is down.
    pub allow_degraded_fallback: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            timeout_secs: 10,
            allow_degraded_fallback: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub queue_capacity: usize,
    pub max_in_flight: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:3000".into(),
            timeout_secs: bazaar_core::notifier::NOTIFY_TIMEOUT.as_secs(),
            queue_capacity: 1024,
            max_in_flight: 16,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub max_actions_per_minute: u32,
    pub max_typing_events_per_minute: u32,
    pub outbound_queue_capacity: usize,
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let app = AppConfig::default();
        Self {
            connect_timeout_secs: app.connect_timeout.as_secs(),
            keepalive_interval_secs: app.keepalive_interval.as_secs(),
            max_actions_per_minute: app.max_actions_per_minute,
            max_typing_events_per_minute: app.max_typing_events_per_minute,
            outbound_queue_capacity: app.outbound_queue_capacity,
            max_frame_bytes: app.max_frame_bytes,
        }
    }
}

impl GatewayConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs.max(1)),
            max_actions_per_minute: self.max_actions_per_minute,
            max_typing_events_per_minute: self.max_typing_events_per_minute,
            outbound_queue_capacity: self.outbound_queue_capacity.max(1),
            max_frame_bytes: self.max_frame_bytes.max(1024),
        }
    }
}

fn generate_config_template(config: &Config) -> String {
    let redis_url = config
        .cache
        .redis_url
        .as_deref()
        .unwrap_or("redis://127.0.0.1:6379");
    format!(
        r#"# Bazaar chat relay configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"

[database]
# "sqlite" or "postgres"; must match the url scheme.
engine = "{db_engine}"
url = "{db_url}"
max_connections = {max_connections}
statement_timeout_secs = {statement_timeout}

[cache]
# "memory" keeps presence local to this process. Use "redis" when running
# more than one relay instance.
backend = "{cache_backend}"
# redis_url = "{redis_url}"
presence_ttl_secs = {presence_ttl}
typing_ttl_secs = {typing_ttl}
token_ttl_secs = {token_ttl}
socket_ttl_secs = {socket_ttl}

[identity]
base_url = "{identity_url}"
timeout_secs = {identity_timeout}
allow_degraded_fallback = {fallback}

[notifications]
enabled = {notify_enabled}
base_url = "{notify_url}"
timeout_secs = {notify_timeout}
queue_capacity = {notify_queue}
max_in_flight = {notify_in_flight}

[gateway]
connect_timeout_secs = {connect_timeout}
keepalive_interval_secs = {keepalive}
max_actions_per_minute = {max_actions}
max_typing_events_per_minute = {max_typing}
outbound_queue_capacity = {outbound_capacity}
max_frame_bytes = {max_frame}
"#,
        bind_address = config.server.bind_address,
        db_engine = match config.database.engine {
            DatabaseEngine::Sqlite => "sqlite",
            DatabaseEngine::Postgres => "postgres",
        },
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        statement_timeout = config.database.statement_timeout_secs,
        cache_backend = match config.cache.backend {
            CacheBackend::Memory => "memory",
            CacheBackend::Redis => "redis",
        },
        redis_url = redis_url,
        presence_ttl = config.cache.presence_ttl_secs,
        typing_ttl = config.cache.typing_ttl_secs,
        token_ttl = config.cache.token_ttl_secs,
        socket_ttl = config.cache.socket_ttl_secs,
        identity_url = config.identity.base_url,
        identity_timeout = config.identity.timeout_secs,
        fallback = config.identity.allow_degraded_fallback,
        notify_enabled = config.notifications.enabled,
        notify_url = config.notifications.base_url,
        notify_timeout = config.notifications.timeout_secs,
        notify_queue = config.notifications.queue_capacity,
        notify_in_flight = config.notifications.max_in_flight,
        connect_timeout = config.gateway.connect_timeout_secs,
        keepalive = config.gateway.keepalive_interval_secs,
        max_actions = config.gateway.max_actions_per_minute,
        max_typing = config.gateway.max_typing_events_per_minute,
        outbound_capacity = config.gateway.outbound_queue_capacity,
        max_frame = config.gateway.max_frame_bytes,
    )
}

// ---- config loading ----

fn parse_or_warn<T: FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {} value '{}'", name, raw);
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', generating defaults...", path);
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies `BAZAAR_*` overrides resolved through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("BAZAAR_BIND_ADDRESS") {
            self.server.bind_address = value;
        }

        if let Some(value) = lookup("BAZAAR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = lookup("BAZAAR_DATABASE_ENGINE") {
            match value.trim().to_ascii_lowercase().as_str() {
                "sqlite" => self.database.engine = DatabaseEngine::Sqlite,
                "postgres" | "postgresql" => self.database.engine = DatabaseEngine::Postgres,
                _ => tracing::warn!(
                    "Ignoring invalid BAZAAR_DATABASE_ENGINE value '{}'; \
                     expected sqlite or postgres",
                    value
                ),
            }
        }
        if let Some(value) = lookup("BAZAAR_DATABASE_MAX_CONNECTIONS") {
            if let Some(parsed) = parse_or_warn("BAZAAR_DATABASE_MAX_CONNECTIONS", &value) {
                self.database.max_connections = parsed;
            }
        }

        if let Some(value) = lookup("BAZAAR_CACHE_BACKEND") {
            match value.trim().to_ascii_lowercase().as_str() {
                "memory" => self.cache.backend = CacheBackend::Memory,
                "redis" => self.cache.backend = CacheBackend::Redis,
                _ => tracing::warn!(
                    "Ignoring invalid BAZAAR_CACHE_BACKEND value '{}'; expected memory or redis",
                    value
                ),
            }
        }
        if let Some(value) = lookup("BAZAAR_REDIS_URL") {
            let value = value.trim().to_string();
            self.cache.redis_url = (!value.is_empty()).then_some(value);
        }

        if let Some(value) = lookup("BAZAAR_IDENTITY_URL") {
            self.identity.base_url = value;
        }
        if let Some(value) = lookup("BAZAAR_IDENTITY_TIMEOUT_SECS") {
            if let Some(parsed) = parse_or_warn("BAZAAR_IDENTITY_TIMEOUT_SECS", &value) {
                self.identity.timeout_secs = parsed;
            }
        }
        if let Some(value) = lookup("BAZAAR_IDENTITY_FALLBACK") {
            if let Some(parsed) = parse_bool(&value) {
                self.identity.allow_degraded_fallback = parsed;
            }
        }

        if let Some(value) = lookup("BAZAAR_NOTIFICATIONS_ENABLED") {
            if let Some(parsed) = parse_bool(&value) {
                self.notifications.enabled = parsed;
            }
        }
        if let Some(value) = lookup("BAZAAR_NOTIFICATIONS_URL") {
            self.notifications.base_url = value;
        }
        if let Some(value) = lookup("BAZAAR_NOTIFICATIONS_TIMEOUT_SECS") {
            if let Some(parsed) = parse_or_warn("BAZAAR_NOTIFICATIONS_TIMEOUT_SECS", &value) {
                self.notifications.timeout_secs = parsed;
            }
        }
        if let Some(value) = lookup("BAZAAR_NOTIFICATIONS_QUEUE_CAPACITY") {
            if let Some(parsed) = parse_or_warn("BAZAAR_NOTIFICATIONS_QUEUE_CAPACITY", &value) {
                self.notifications.queue_capacity = parsed;
            }
        }

        if let Some(value) = lookup("BAZAAR_GATEWAY_MAX_ACTIONS_PER_MINUTE") {
            if let Some(parsed) = parse_or_warn("BAZAAR_GATEWAY_MAX_ACTIONS_PER_MINUTE", &value) {
                self.gateway.max_actions_per_minute = parsed;
            }
        }
        if let Some(value) = lookup("BAZAAR_GATEWAY_MAX_TYPING_PER_MINUTE") {
            if let Some(parsed) = parse_or_warn("BAZAAR_GATEWAY_MAX_TYPING_PER_MINUTE", &value) {
                self.gateway.max_typing_events_per_minute = parsed;
            }
        }
        if let Some(value) = lookup("BAZAAR_GATEWAY_MAX_FRAME_BYTES") {
            if let Some(parsed) = parse_or_warn("BAZAAR_GATEWAY_MAX_FRAME_BYTES", &value) {
                self.gateway.max_frame_bytes = parsed;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let detected = bazaar_db::detect_database_engine(&self.database.url)?;
        let configured = bazaar_db::DatabaseEngine::from(self.database.engine);
        if detected != configured {
            bail!(
                "database.engine is '{}' but database.url uses '{}'",
                configured.as_str(),
                detected.as_str()
            );
        }
        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_none() {
            bail!("cache.backend = \"redis\" requires cache.redis_url (or BAZAAR_REDIS_URL)");
        }
        if self.identity.base_url.trim().is_empty() {
            bail!("identity.base_url must be set");
        }
        if self.notifications.enabled && self.notifications.base_url.trim().is_empty() {
            bail!("notifications.base_url must be set when notifications are enabled");
        }
        Ok(())
    }
}
