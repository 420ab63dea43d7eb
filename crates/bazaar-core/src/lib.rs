pub mod auth;
pub mod error;
pub mod events;
pub mod identity;
pub mod notifier;
pub mod observability;
pub mod registry;
pub mod session_cache;
pub mod token;
pub mod validation;

use bazaar_db::DbPool;
use std::sync::Arc;
use std::time::Duration;

pub use error::ActionError;

/// Limits and timers for the gateway connection loop.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// How long a new connection may spend authenticating.
    pub connect_timeout: Duration,
    /// Transport ping and presence refresh period.
    pub keepalive_interval: Duration,
    /// Non-typing actions per user per minute, shared across connections.
    pub max_actions_per_minute: u32,
    pub max_typing_events_per_minute: u32,
    /// Bound of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Max inbound frame size in bytes.
    pub max_frame_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(25),
            max_actions_per_minute: 240,
            max_typing_events_per_minute: 120,
            outbound_queue_capacity: events::DEFAULT_CONNECTION_CAPACITY,
            max_frame_bytes: 64 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub cache: session_cache::SessionCache,
    pub auth: auth::AuthCoordinator,
    /// User -> live connection ids on this process.
    pub registry: Arc<registry::SessionRegistry>,
    pub event_bus: events::EventBus,
    pub notifier: notifier::OfflineNotifier,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        db: DbPool,
        cache: session_cache::SessionCache,
        auth: auth::AuthCoordinator,
        notifier: notifier::OfflineNotifier,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            cache,
            auth,
            registry: Arc::new(registry::SessionRegistry::new()),
            event_bus: events::EventBus::new(config.outbound_queue_capacity),
            notifier,
            config,
        }
    }
}
