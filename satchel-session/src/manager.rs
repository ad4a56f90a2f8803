//! Backend wiring and per-request session creation.

use crate::config::{SessionBackendKind, SessionConfig};
use crate::error::{SessionError, SessionResult};
use crate::file::FileStore;
use crate::id::{IdGenerator, is_valid_id};
use crate::memory::MemoryStore;
use crate::policy::PersistencePolicy;
use crate::session::Session;
use crate::traits::SessionStore;
use satchel_log::{info, warn};
use std::sync::Arc;

/// Build the store described by `config`.
///
/// The SQL table is created if missing. `config.policy` applies to
/// whole-state stores only; per-key stores always write through.
pub async fn open_backend(config: &SessionConfig) -> SessionResult<Arc<dyn SessionStore>> {
    config.validate()?;

    let store: Arc<dyn SessionStore> = match config.backend {
        SessionBackendKind::Memory => Arc::new(
            MemoryStore::new().with_policy(config.policy.unwrap_or(PersistencePolicy::Lazy)),
        ),
        SessionBackendKind::File => {
            let root = config
                .root
                .as_ref()
                .ok_or_else(|| SessionError::Config("file backend requires a root".to_string()))?;
            Arc::new(
                FileStore::new(root, &config.name)
                    .await?
                    .with_policy(config.policy.unwrap_or(PersistencePolicy::Eager)),
            )
        }
        #[cfg(feature = "sqlite")]
        SessionBackendKind::Sqlite => {
            let store = crate::sql_session::SqlStore::connect(&config.url, &config.table).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        #[cfg(feature = "redis")]
        SessionBackendKind::Redis => {
            Arc::new(crate::redis_session::RedisSessionStore::new(config.clone()).await?)
        }
        #[cfg(feature = "memcached")]
        SessionBackendKind::Memcached => {
            Arc::new(crate::memcached_session::MemcachedSessionStore::new(config.clone()).await?)
        }
        #[allow(unreachable_patterns)]
        ref other => {
            return Err(SessionError::Config(format!(
                "{} backend is not enabled in this build",
                other
            )));
        }
    };

    if config.policy.is_some() && store.granularity().forced_policy().is_some() {
        warn!(fields: { "backend" => store.backend_name() }, "Ignoring persistence policy for per-key store");
    }

    info!(fields: { "backend" => store.backend_name(), "name" => config.name }, "Session store ready");
    Ok(store)
}

/// Hands out sessions that share one store.
///
/// # Examples
///
/// ```
/// use satchel_session::{SessionConfig, SessionManager};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> satchel_session::SessionResult<()> {
/// let manager = SessionManager::connect(SessionConfig::memory()).await?;
///
/// let mut session = manager.open(None);
/// session.start().await?;
/// session.set("user_id", 42).await?;
/// session.save().await?;
///
/// let cookie = session.directive().unwrap();
/// let mut again = manager.open(Some(&cookie.id));
/// again.start().await?;
/// assert_eq!(again.get::<i32>("user_id"), Some(42));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    generator: Arc<dyn IdGenerator>,
    config: SessionConfig,
}

impl SessionManager {
    /// Use an existing store.
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            store,
            generator: Arc::new(config.id_strategy),
            config,
        }
    }

    /// Build the store from `config` with [`open_backend`].
    pub async fn connect(config: SessionConfig) -> SessionResult<Self> {
        let store = open_backend(&config).await?;
        Ok(Self::new(store, config))
    }

    /// Use a custom identifier generator.
    pub fn with_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Create a session for one request.
    ///
    /// `inbound` is the identifier the client sent, if any. Malformed
    /// identifiers are discarded and a fresh one is issued on start.
    pub fn open(&self, inbound: Option<&str>) -> Session {
        let session = Session::new(self.store.clone(), self.generator.clone())
            .with_name(&self.config.name)
            .with_lifetime(self.config.lifetime)
            .with_strict_ids(self.config.strict_ids);

        match inbound {
            Some(id) if is_valid_id(id) => session.with_id(id),
            Some(id) => {
                warn!(fields: { "length" => id.len() }, "Discarding malformed session identifier");
                session
            }
            None => session,
        }
    }

    /// Shared store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Configuration this manager was built from.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Drop expired records from stores without native expiry.
    pub async fn purge_expired(&self) -> SessionResult<usize> {
        let purged = self.store.purge_expired().await?;
        if purged > 0 {
            info!(fields: { "backend" => self.store.backend_name(), "purged" => purged }, "Purged expired sessions");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_open_discards_malformed_identifier() {
        let manager = SessionManager::connect(SessionConfig::memory()).await.unwrap();

        let mut session = manager.open(Some("../../etc/passwd"));
        assert!(session.id().is_none());
        session.start().await.unwrap();
        assert!(is_valid_id(session.id().unwrap()));

        let session = manager.open(Some("short"));
        assert!(session.id().is_none());
    }

    #[tokio::test]
    async fn test_open_applies_config() {
        let config = SessionConfig::memory()
            .with_name("shop")
            .with_lifetime(Duration::from_secs(90));
        let manager = SessionManager::connect(config).await.unwrap();

        let id = "0123456789abcdef0123";
        let session = manager.open(Some(id));
        assert_eq!(session.id(), Some(id));
        assert_eq!(session.name(), "shop");
        assert_eq!(session.lifetime(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_open_backend_applies_policy() {
        let store = open_backend(&SessionConfig::memory().with_policy(PersistencePolicy::Eager))
            .await
            .unwrap();
        assert_eq!(store.policy(), PersistencePolicy::Eager);

        let dir = tempfile::tempdir().unwrap();
        let store = open_backend(&SessionConfig::file(dir.path())).await.unwrap();
        assert_eq!(store.backend_name(), "file");
        assert_eq!(store.policy(), PersistencePolicy::Eager);
    }

    #[tokio::test]
    async fn test_open_backend_rejects_missing_root() {
        let mut config = SessionConfig::file("/tmp");
        config.root = None;
        assert!(matches!(open_backend(&config).await, Err(SessionError::Config(_))));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_open_backend_creates_sql_table() {
        let config = SessionConfig::sqlite("sqlite::memory:").unwrap();
        let manager = SessionManager::connect(config).await.unwrap();

        let mut session = manager.open(None);
        session.start().await.unwrap();
        session.set("k", "v").await.unwrap();
        assert!(manager.store().exists(session.id().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_on_memory() {
        let config = SessionConfig::memory()
            .with_policy(PersistencePolicy::Eager)
            .with_lifetime(Duration::from_millis(1));
        let manager = SessionManager::connect(config).await.unwrap();

        let mut session = manager.open(None);
        session.start().await.unwrap();
        session.set("k", 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.purge_expired().await.unwrap(), 1);
    }
}
