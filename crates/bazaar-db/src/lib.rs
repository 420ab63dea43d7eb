pub mod chat_contexts;
pub mod chat_settings;
pub mod chats;
pub mod messages;
pub mod read_receipts;

use sqlx::any::AnyPoolOptions;
use std::sync::OnceLock;
use thiserror::Error;

pub type DbPool = sqlx::AnyPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    Sqlite,
    Postgres,
}

impl DatabaseEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

static ACTIVE_DB_ENGINE: OnceLock<DatabaseEngine> = OnceLock::new();

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
}

/// Optional tuning knobs applied after each PostgreSQL connection is established.
#[derive(Debug, Clone, Default)]
pub struct PgConnectOptions {
    /// `statement_timeout` in seconds (0 = disabled).
    pub statement_timeout_secs: u64,
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    create_pool_full(database_url, max_connections, None, None).await
}

pub async fn create_pool_full(
    database_url: &str,
    max_connections: u32,
    engine: Option<DatabaseEngine>,
    pg_options: Option<PgConnectOptions>,
) -> Result<DbPool, sqlx::Error> {
    let detected_engine = detect_database_engine(database_url)?;
    let engine = engine.unwrap_or(detected_engine);
    if engine != detected_engine {
        return Err(sqlx::Error::Configuration(
            format!(
                "database engine/url mismatch: engine='{}' url='{}'",
                engine.as_str(),
                database_url
            )
            .into(),
        ));
    }

    let _ = ACTIVE_DB_ENGINE.set(engine);

    // Required once before using sqlx::Any.
    sqlx::any::install_default_drivers();

    let connect_url = if matches!(engine, DatabaseEngine::Sqlite) {
        normalize_sqlite_url_for_any(database_url)
    } else {
        database_url.to_string()
    };

    let pg_opts = pg_options.unwrap_or_default();
    AnyPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(move |conn, _meta| {
            let sqlite_db = matches!(engine, DatabaseEngine::Sqlite);
            let pg_opts = pg_opts.clone();
            Box::pin(async move {
                if sqlite_db {
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA foreign_keys = ON;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous = NORMAL;")
                        .execute(&mut *conn)
                        .await?;
                } else {
                    if pg_opts.statement_timeout_secs > 0 {
                        let sql = format!(
                            "SET statement_timeout = '{}s'",
                            pg_opts.statement_timeout_secs
                        );
                        sqlx::query(&sql).execute(&mut *conn).await?;
                    }
                    sqlx::query("SET timezone = 'UTC'")
                        .execute(&mut *conn)
                        .await?;
                }
                Ok(())
            })
        })
        .connect(&connect_url)
        .await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    run_migrations_for_engine(pool, active_database_engine()).await
}

pub async fn run_migrations_for_engine(
    pool: &DbPool,
    engine: DatabaseEngine,
) -> Result<(), sqlx::Error> {
    match engine {
        DatabaseEngine::Sqlite => sqlx::migrate!("./migrations").run(pool).await?,
        DatabaseEngine::Postgres => sqlx::migrate!("./migrations_pg").run(pool).await?,
    }
    tracing::info!(engine = engine.as_str(), "migrations: applied successfully");
    Ok(())
}

/// Round-trips a trivial query; used by the health endpoint.
pub async fn ping(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

pub fn detect_database_engine(database_url: &str) -> Result<DatabaseEngine, sqlx::Error> {
    let normalized = database_url.trim().to_ascii_lowercase();
    if normalized.starts_with("sqlite:") {
        Ok(DatabaseEngine::Sqlite)
    } else if normalized.starts_with("postgres://") || normalized.starts_with("postgresql://") {
        Ok(DatabaseEngine::Postgres)
    } else {
        Err(sqlx::Error::Configuration(
            format!("unsupported database URL scheme in '{}'", database_url).into(),
        ))
    }
}

pub fn active_database_engine() -> DatabaseEngine {
    *ACTIVE_DB_ENGINE.get().unwrap_or(&DatabaseEngine::Sqlite)
}

fn normalize_sqlite_url_for_any(url: &str) -> String {
    // sqlx::Any expects absolute Windows paths in the sqlite:///C:/... form.
    if !url.starts_with("sqlite://") {
        return url.to_string();
    }
    let rest = &url["sqlite://".len()..];
    if rest.starts_with('/') {
        return url.to_string();
    }
    let bytes = rest.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        format!("sqlite:///{rest}")
    } else {
        url.to_string()
    }
}

/// Timestamps are stored as fixed-width UTC text so that lexical order is
/// chronological on both engines.
pub(crate) fn datetime_to_db_text(value: chrono::DateTime<chrono::Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub(crate) fn datetime_from_db_text(
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>, sqlx::Error> {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(sqlx::Error::Protocol(format!(
        "invalid datetime text '{}'",
        value
    )))
}

pub(crate) fn bool_from_any_row(
    row: &sqlx::any::AnyRow,
    column: &str,
) -> Result<bool, sqlx::Error> {
    use sqlx::Row;
    let first_err = match row.try_get::<bool, _>(column) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    if let Ok(raw) = row.try_get::<i64, _>(column) {
        return Ok(raw != 0);
    }
    if let Ok(raw) = row.try_get::<i32, _>(column) {
        return Ok(raw != 0);
    }
    if let Ok(raw) = row.try_get::<i16, _>(column) {
        return Ok(raw != 0);
    }

    Err(first_err)
}
