use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use bazaar_core::auth::AuthCoordinator;
use bazaar_core::identity::IdentityClient;
use bazaar_core::notifier::{NotificationWorker, OfflineNotifier};
use bazaar_core::session_cache::SessionCache;
use bazaar_core::{observability, AppState};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

use config::CacheBackend;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bazaar=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    ensure_data_dirs(&config);

    let db = bazaar_db::create_pool_full(
        &config.database.url,
        config.database.max_connections,
        Some(config.database.engine.into()),
        Some(bazaar_db::PgConnectOptions {
            statement_timeout_secs: config.database.statement_timeout_secs,
        }),
    )
    .await?;
    bazaar_db::run_migrations(&db).await?;

    let ttls = config.cache.ttls();
    let cache = match (config.cache.backend, config.cache.redis_url.as_deref()) {
        (CacheBackend::Redis, Some(url)) => SessionCache::connect_redis(url, ttls).await?,
        _ => SessionCache::memory(ttls),
    };

    let identity = IdentityClient::new(
        &config.identity.base_url,
        Duration::from_secs(config.identity.timeout_secs),
    )?;
    let auth = AuthCoordinator::new(
        cache.clone(),
        identity,
        config.identity.allow_degraded_fallback,
    );

    let notifier = if config.notifications.enabled {
        let (notifier, rx) = OfflineNotifier::channel(config.notifications.queue_capacity);
        NotificationWorker::new(
            &config.notifications.base_url,
            Duration::from_secs(config.notifications.timeout_secs),
            config.notifications.max_in_flight,
        )?
        .spawn(rx);
        notifier
    } else {
        OfflineNotifier::disabled()
    };

    let state = AppState::new(db, cache, auth, notifier, config.gateway.to_app_config());

    let app = Router::new()
        .route("/health", get(health))
        .merge(bazaar_ws::gateway_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        bind_address = %config.server.bind_address,
        database = bazaar_db::active_database_engine().as_str(),
        cache = state.cache.backend_name(),
        identity = %config.identity.base_url,
        notifications = state.notifier.is_enabled(),
        "bazaar relay listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to install ctrl-c handler: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down (ctrl-c)...");
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let database_ok = match bazaar_db::ping(&state.db).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("health: database ping failed: {e}");
            false
        }
    };
    let cache_ok = match state.cache.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("health: cache ping failed: {e}");
            false
        }
    };

    Json(json!({
        "status": if database_ok && cache_ok { "ok" } else { "degraded" },
        "database": {
            "engine": bazaar_db::active_database_engine().as_str(),
            "ok": database_ok,
        },
        "cache": {
            "backend": state.cache.backend_name(),
            "ok": cache_ok,
        },
        "connections": state.registry.connection_count(),
        "users": state.registry.user_count(),
        "counters": observability::snapshot(),
    }))
}

/// Directory holding the SQLite file, if the url points at one.
fn sqlite_parent_dir(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    PathBuf::from(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
}

fn ensure_data_dirs(config: &config::Config) {
    if let Some(dir) = sqlite_parent_dir(&config.database.url) {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("Could not create directory '{}': {}", dir.display(), e);
        }
    }
}
