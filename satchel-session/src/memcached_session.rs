//! Memcached session storage implementation.
//!
//! This module requires the `memcached` feature flag.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::policy::{Granularity, PersistencePolicy};
use crate::traits::{SessionStore, State, decode_state, encode_state};
use async_trait::async_trait;
use chrono::Utc;
use satchel_log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Relative expirations above this are read by memcached as unix timestamps.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Memcached-backed session store: one JSON document per session under
/// `{name}:{session_id}`.
///
/// Decode policy: **fail-open**. A document that does not parse is
/// logged at warn level and treated as an absent record, so the session
/// starts empty and the next write replaces it. Prior data in that record
/// is lost.
///
/// Flash messages are not supported.
///
/// Defaults to [`PersistencePolicy::Lazy`].
///
/// # Feature Flag
///
/// ```toml
/// [dependencies]
/// satchel-session = { version = "0.1", features = ["memcached"] }
/// ```
#[derive(Clone)]
pub struct MemcachedSessionStore {
    client: Arc<Mutex<memcache::Client>>,
    config: SessionConfig,
    policy: PersistencePolicy,
}

impl MemcachedSessionStore {
    /// Connect using `config.url`.
    pub async fn new(config: SessionConfig) -> SessionResult<Self> {
        let url = config.url.clone();
        let client = tokio::task::spawn_blocking(move || memcache::connect(url.as_str()))
            .await
            .map_err(|e| SessionError::Connection(format!("Failed to spawn task: {}", e)))?
            .map_err(|e| SessionError::Connection(format!("Failed to connect: {}", e)))?;

        debug!(fields: { "namespace" => config.name }, "Connected Memcached session store");

        Ok(Self::with_client(client, config))
    }

    /// Use a client the caller already owns.
    pub fn with_client(client: memcache::Client, config: SessionConfig) -> Self {
        let policy = config.policy.unwrap_or(PersistencePolicy::Lazy);
        Self {
            client: Arc::new(Mutex::new(client)),
            config,
            policy,
        }
    }

    /// Use a different persistence policy.
    pub fn with_policy(mut self, policy: PersistencePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn session_key(&self, session_id: &str) -> String {
        self.config.session_key(session_id)
    }

    /// Run a blocking client call off the async runtime.
    async fn call<T, F>(&self, f: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let client = client.blocking_lock();
            f(&client)
        })
        .await
        .map_err(|e| SessionError::Io(std::io::Error::other(format!("Task join error: {}", e))))?
        .map_err(SessionError::from)
    }

    async fn get_raw(&self, session_id: &str) -> SessionResult<Option<String>> {
        let key = self.session_key(session_id);
        self.call(move |client| client.get::<String>(&key)).await
    }
}

/// Memcached expiration for a lifetime.
fn expiration(lifetime: Duration) -> u32 {
    let secs = lifetime.as_secs().max(1);
    if secs <= MAX_RELATIVE_EXPIRATION {
        secs as u32
    } else {
        let at = Utc::now().timestamp().max(0) as u64 + secs;
        at.min(u32::MAX as u64) as u32
    }
}

#[async_trait]
impl SessionStore for MemcachedSessionStore {
    fn backend_name(&self) -> &'static str {
        "memcached"
    }

    fn granularity(&self) -> Granularity {
        Granularity::WholeState
    }

    fn policy(&self) -> PersistencePolicy {
        self.policy
    }

    fn supports_flash(&self) -> bool {
        false
    }

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        Ok(self.get_raw(session_id).await?.is_some())
    }

    async fn read(&self, session_id: &str) -> SessionResult<Option<State>> {
        let Some(raw) = self.get_raw(session_id).await? else {
            return Ok(None);
        };

        match decode_state(session_id, &raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(fields: { "session_id" => session_id }, "Discarding malformed session document: {}", e);
                Ok(None)
            }
        }
    }

    async fn write(&self, session_id: &str, state: &State, lifetime: Duration) -> SessionResult<()> {
        let key = self.session_key(session_id);
        let json = encode_state(state)?;
        let exp = expiration(lifetime);
        self.call(move |client| client.set(&key, json.as_str(), exp))
            .await
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        let key = self.session_key(session_id);
        // false means the key was already gone
        self.call(move |client| client.delete(&key)).await?;
        Ok(())
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<()> {
        let Some(raw) = self.get_raw(old_id).await? else {
            return Ok(());
        };

        let new_key = self.session_key(new_id);
        let exp = expiration(self.config.lifetime);
        self.call(move |client| client.set(&new_key, raw.as_str(), exp))
            .await?;
        self.delete(old_id).await
    }

    async fn annotate_expiry(&self, session_id: &str, lifetime: Duration) -> SessionResult<()> {
        let key = self.session_key(session_id);
        let exp = expiration(lifetime);
        self.call(move |client| client.touch(&key, exp)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_generation() {
        let config = SessionConfig::memcached("memcache://localhost:11211").unwrap();
        assert!(config.session_key("test-id").starts_with("app:"));
    }

    #[test]
    fn test_expiration_switches_to_timestamp() {
        assert_eq!(expiration(Duration::ZERO), 1);
        assert_eq!(expiration(Duration::from_secs(7200)), 7200);

        let long = expiration(Duration::from_secs(MAX_RELATIVE_EXPIRATION + 1));
        assert!(long as i64 > Utc::now().timestamp());
    }
}
