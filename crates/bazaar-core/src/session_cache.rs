use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const ONLINE_USERS_KEY: &str = "online:users";
const MEMORY_MAX_ENTRIES: u64 = 200_000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("invalid cached value under '{0}'")]
    Corrupt(String),
}

/// Lifetimes for each key namespace.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub presence: Duration,
    pub typing: Duration,
    pub token: Duration,
    pub socket: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            presence: Duration::from_secs(300),
            typing: Duration::from_secs(10),
            token: Duration::from_secs(600),
            socket: Duration::from_secs(300),
        }
    }
}

fn presence_key(user_id: i64) -> String {
    format!("user:{user_id}:online")
}

fn typing_key(chat_id: i64, user_id: i64) -> String {
    format!("chat:{chat_id}:typing:{user_id}")
}

fn token_key(token: &str) -> String {
    format!("token:{token}:user")
}

fn socket_key(conn_id: &str) -> String {
    format!("socket:{conn_id}:user")
}

#[derive(Clone)]
struct TimedValue {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, TimedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TimedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &TimedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Single-node backend. Keys expire individually; sets never expire.
#[derive(Clone)]
pub struct MemoryStore {
    values: Cache<String, TimedValue>,
    sets: Arc<DashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            values: Cache::builder()
                .max_capacity(MEMORY_MAX_ENTRIES)
                .expire_after(PerEntryTtl)
                .build(),
            sets: Arc::new(DashMap::new()),
        }
    }
}

/// Shared backend over one multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: Arc<Mutex<redis::aio::MultiplexedConnection>>,
}

#[derive(Clone)]
enum Backend {
    Memory(MemoryStore),
    Redis(RedisStore),
}

/// Presence, typing, token and socket keys with per-namespace TTLs.
#[derive(Clone)]
pub struct SessionCache {
    backend: Backend,
    ttls: CacheTtls,
}

impl SessionCache {
    pub fn memory(ttls: CacheTtls) -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::new()),
            ttls,
        }
    }

    pub async fn connect_redis(url: &str, ttls: CacheTtls) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let cache = Self {
            backend: Backend::Redis(RedisStore {
                conn: Arc::new(Mutex::new(conn)),
            }),
            ttls,
        };
        cache.ping().await?;
        Ok(cache)
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Redis(_) => "redis",
        }
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        if let Backend::Redis(store) = &self.backend {
            let mut conn = store.conn.lock().await;
            let _: String = redis::cmd("PING")
                .query_async::<_, String>(&mut *conn)
                .await?;
        }
        Ok(())
    }

    // --- presence ---

    /// Marks the user online. Also used to refresh the TTL.
    pub async fn set_presence(&self, user_id: i64, conn_id: &str) -> Result<(), CacheError> {
        self.set_ex(&presence_key(user_id), conn_id, self.ttls.presence)
            .await?;
        self.set_add(ONLINE_USERS_KEY, &user_id.to_string()).await
    }

    pub async fn clear_presence(&self, user_id: i64) -> Result<(), CacheError> {
        self.del(&presence_key(user_id)).await?;
        self.set_remove(ONLINE_USERS_KEY, &user_id.to_string())
            .await
    }

    pub async fn is_online(&self, user_id: i64) -> Result<bool, CacheError> {
        self.exists(&presence_key(user_id)).await
    }

    /// Members of the online set whose presence key is still live. Stale
    /// members are removed as a side effect.
    pub async fn online_users(&self) -> Result<Vec<i64>, CacheError> {
        let members = self.set_members(ONLINE_USERS_KEY).await?;
        let mut online = Vec::with_capacity(members.len());
        for member in members {
            let Ok(user_id) = member.parse::<i64>() else {
                self.set_remove(ONLINE_USERS_KEY, &member).await?;
                continue;
            };
            if self.is_online(user_id).await? {
                online.push(user_id);
            } else {
                tracing::debug!(user_id, "pruning stale online member");
                self.set_remove(ONLINE_USERS_KEY, &member).await?;
            }
        }
        online.sort_unstable();
        Ok(online)
    }

    // --- typing ---

    pub async fn set_typing(&self, chat_id: i64, user_id: i64) -> Result<(), CacheError> {
        self.set_ex(&typing_key(chat_id, user_id), "1", self.ttls.typing)
            .await
    }

    pub async fn clear_typing(&self, chat_id: i64, user_id: i64) -> Result<(), CacheError> {
        self.del(&typing_key(chat_id, user_id)).await
    }

    pub async fn is_typing(&self, chat_id: i64, user_id: i64) -> Result<bool, CacheError> {
        self.exists(&typing_key(chat_id, user_id)).await
    }

    // --- token cache ---

    /// Caches `token -> user_id`. The entry never outlives the token itself;
    /// already expired tokens are not cached.
    pub async fn cache_token(&self, token: &str, user_id: i64) -> Result<(), CacheError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = match crate::token::remaining_lifetime_secs(token, now) {
            Some(remaining) if remaining <= 0 => return Ok(()),
            Some(remaining) => self.ttls.token.min(Duration::from_secs(remaining as u64)),
            None => self.ttls.token,
        };
        self.set_ex(&token_key(token), &user_id.to_string(), ttl)
            .await
    }

    pub async fn cached_token_user(&self, token: &str) -> Result<Option<i64>, CacheError> {
        let key = token_key(token);
        match self.get(&key).await? {
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| CacheError::Corrupt(key)),
            None => Ok(None),
        }
    }

    /// Drops a cached token so only local claim checks can vouch for it.
    pub async fn forget_token(&self, token: &str) -> Result<(), CacheError> {
        self.del(&token_key(token)).await
    }

    // --- socket binding ---

    pub async fn bind_socket(&self, conn_id: &str, user_id: i64) -> Result<(), CacheError> {
        self.set_ex(&socket_key(conn_id), &user_id.to_string(), self.ttls.socket)
            .await
    }

    pub async fn unbind_socket(&self, conn_id: &str) -> Result<(), CacheError> {
        self.del(&socket_key(conn_id)).await
    }

    pub async fn socket_user(&self, conn_id: &str) -> Result<Option<i64>, CacheError> {
        let key = socket_key(conn_id);
        match self.get(&key).await? {
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| CacheError::Corrupt(key)),
            None => Ok(None),
        }
    }

    // --- primitives ---

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        match &self.backend {
            Backend::Memory(store) => {
                store
                    .values
                    .insert(
                        key.to_string(),
                        TimedValue {
                            value: value.to_string(),
                            ttl,
                        },
                    )
                    .await;
                Ok(())
            }
            Backend::Redis(store) => {
                let millis = ttl.as_millis().max(1) as u64;
                let mut conn = store.conn.lock().await;
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(millis)
                    .query_async::<_, ()>(&mut *conn)
                    .await?;
                Ok(())
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.values.get(key).await.map(|entry| entry.value)),
            Backend::Redis(store) => {
                let mut conn = store.conn.lock().await;
                let value = redis::cmd("GET")
                    .arg(key)
                    .query_async::<_, Option<String>>(&mut *conn)
                    .await?;
                Ok(value)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.values.get(key).await.is_some()),
            Backend::Redis(store) => {
                let mut conn = store.conn.lock().await;
                let count = redis::cmd("EXISTS")
                    .arg(key)
                    .query_async::<_, i64>(&mut *conn)
                    .await?;
                Ok(count > 0)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        match &self.backend {
            Backend::Memory(store) => {
                store.values.invalidate(key).await;
                Ok(())
            }
            Backend::Redis(store) => {
                let mut conn = store.conn.lock().await;
                let _: i64 = redis::cmd("DEL")
                    .arg(key)
                    .query_async::<_, i64>(&mut *conn)
                    .await?;
                Ok(())
            }
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        match &self.backend {
            Backend::Memory(store) => {
                store
                    .sets
                    .entry(key.to_string())
                    .or_default()
                    .insert(member.to_string());
                Ok(())
            }
            Backend::Redis(store) => {
                let mut conn = store.conn.lock().await;
                let _: i64 = redis::cmd("SADD")
                    .arg(key)
                    .arg(member)
                    .query_async::<_, i64>(&mut *conn)
                    .await?;
                Ok(())
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        match &self.backend {
            Backend::Memory(store) => {
                if let Some(mut set) = store.sets.get_mut(key) {
                    set.remove(member);
                }
                store.sets.remove_if(key, |_, set| set.is_empty());
                Ok(())
            }
            Backend::Redis(store) => {
                let mut conn = store.conn.lock().await;
                let _: i64 = redis::cmd("SREM")
                    .arg(key)
                    .arg(member)
                    .query_async::<_, i64>(&mut *conn)
                    .await?;
                Ok(())
            }
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store
                .sets
                .get(key)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()),
            Backend::Redis(store) => {
                let mut conn = store.conn.lock().await;
                let members = redis::cmd("SMEMBERS")
                    .arg(key)
                    .query_async::<_, Vec<String>>(&mut *conn)
                    .await?;
                Ok(members)
            }
        }
    }
}
