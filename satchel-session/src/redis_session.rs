//! Redis session storage implementation.
//!
//! Each session is one Redis hash, `{name}:{session_id}`, with one field
//! per state key holding the JSON-encoded value.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::policy::{Granularity, PersistencePolicy};
use crate::traits::{SessionStore, State};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use satchel_log::{debug, error};
use std::collections::HashMap;
use std::time::Duration;

/// Redis-backed session store.
///
/// Every mutation writes through to a single hash field; the hash TTL is
/// refreshed on each write. `write` upserts the given fields in a `MULTI`
/// block and leaves the other fields in place.
///
/// TTLs are capped at `config.max_lifetime`.
///
/// Decode policy: **fail-closed**. A field that is not valid JSON makes
/// the read fail with [`SessionError::Decode`].
///
/// # Examples
///
/// ```no_run
/// use satchel_session::{RedisSessionStore, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = SessionConfig::redis("redis://localhost:6379")?.with_name("myapp");
///     let store = RedisSessionStore::new(config).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    config: SessionConfig,
}

impl RedisSessionStore {
    /// Connect using `config.url`.
    pub async fn new(config: SessionConfig) -> SessionResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        debug!(fields: { "namespace" => config.name }, "Connected Redis session store");

        Ok(Self { conn, config })
    }

    /// Use a connection the caller already owns.
    pub fn with_connection(conn: ConnectionManager, config: SessionConfig) -> Self {
        Self { conn, config }
    }

    fn session_key(&self, session_id: &str) -> String {
        self.config.session_key(session_id)
    }

    fn ttl(&self, lifetime: Duration) -> i64 {
        ttl_secs(lifetime, self.config.max_lifetime)
    }
}

/// Longest TTL sent to the server, well inside what `EXPIRE` accepts.
const MAX_TTL_SECS: u64 = i32::MAX as u64;

fn ttl_secs(lifetime: Duration, max: Duration) -> i64 {
    lifetime.min(max).as_secs().clamp(1, MAX_TTL_SECS) as i64
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    fn granularity(&self) -> Granularity {
        Granularity::PerKey
    }

    fn policy(&self) -> PersistencePolicy {
        PersistencePolicy::Eager
    }

    fn supports_flash(&self) -> bool {
        true
    }

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.session_key(session_id)).await?;
        Ok(exists)
    }

    async fn read(&self, session_id: &str) -> SessionResult<Option<State>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.session_key(session_id)).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        let mut state = State::with_capacity(fields.len());
        for (key, raw) in fields {
            let value = serde_json::from_str(&raw).map_err(|e| {
                error!(fields: { "session_id" => session_id, "key" => key }, "Session field is malformed: {}", e);
                SessionError::decode(session_id, format!("field {}: {}", key, e))
            })?;
            state.insert(key, value);
        }

        Ok(Some(state))
    }

    async fn write(&self, session_id: &str, state: &State, lifetime: Duration) -> SessionResult<()> {
        let key = self.session_key(session_id);
        let items = state
            .iter()
            .map(|(k, v)| Ok((k.clone(), serde_json::to_string(v)?)))
            .collect::<SessionResult<Vec<(String, String)>>>()?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if !items.is_empty() {
            pipe.hset_multiple(&key, items.as_slice()).ignore();
        }
        pipe.expire(&key, self.ttl(lifetime)).ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn write_key(
        &self,
        session_id: &str,
        key: &str,
        value: &serde_json::Value,
        lifetime: Duration,
    ) -> SessionResult<()> {
        let hash = self.session_key(session_id);
        let json = serde_json::to_string(value)?;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(&hash, key, json)
            .ignore()
            .expire(&hash, self.ttl(lifetime))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.session_key(session_id)).await?;
        Ok(())
    }

    async fn delete_key(&self, session_id: &str, key: &str) -> SessionResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(self.session_key(session_id), key).await?;
        Ok(())
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<()> {
        let old_key = self.session_key(old_id);
        let new_key = self.session_key(new_id);
        let mut conn = self.conn.clone();

        // RENAME keeps the TTL and fails only when the source is gone.
        let renamed: redis::RedisResult<()> = conn.rename(&old_key, &new_key).await;
        if let Err(e) = renamed {
            let still_there: bool = conn.exists(&old_key).await?;
            if still_there {
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn annotate_expiry(&self, session_id: &str, lifetime: Duration) -> SessionResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .expire(self.session_key(session_id), self.ttl(lifetime))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_generation() {
        let config = SessionConfig::redis("redis://localhost:6379").unwrap();
        assert_eq!(config.session_key("test-id"), "app:test-id");
    }

    #[test]
    fn test_ttl_secs_bounds() {
        let max = SessionConfig::default().max_lifetime;
        assert_eq!(ttl_secs(Duration::ZERO, max), 1);
        assert_eq!(ttl_secs(Duration::from_secs(7200), max), 7200);
        assert_eq!(ttl_secs(Duration::MAX, max), max.as_secs() as i64);
        assert_eq!(ttl_secs(Duration::MAX, Duration::MAX), MAX_TTL_SECS as i64);
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn test_write_upserts_and_keeps_other_fields() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let config = SessionConfig::redis(&url).unwrap().with_name("satchel-test");
        let store = RedisSessionStore::new(config).await.unwrap();
        let id = "redis-upsert-0000001";
        let ttl = Duration::from_secs(60);
        store.delete(id).await.unwrap();

        store.write_key(id, "a", &serde_json::json!(1), ttl).await.unwrap();
        let mut state = State::new();
        state.insert("b".into(), serde_json::json!(2));
        store.write(id, &state, ttl).await.unwrap();

        let stored = store.read(id).await.unwrap().unwrap();
        assert_eq!(stored.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(stored.get("b"), Some(&serde_json::json!(2)));
        store.delete(id).await.unwrap();
    }
}
