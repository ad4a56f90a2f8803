//! Session configuration.

use crate::error::{SessionError, SessionResult};
use crate::id::IdStrategy;
use crate::policy::PersistencePolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Session backend type.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionBackendKind {
    /// In-process map
    Memory,
    /// One JSON document per session under a root directory
    File,
    /// One row per key in a SQL table
    Sqlite,
    /// One Redis hash per session
    Redis,
    /// One Memcached blob per session
    Memcached,
}

impl SessionBackendKind {
    /// Parse a backend name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(SessionBackendKind::Memory),
            "file" | "filesystem" => Some(SessionBackendKind::File),
            "sqlite" | "sql" => Some(SessionBackendKind::Sqlite),
            "redis" => Some(SessionBackendKind::Redis),
            "memcached" | "memcache" => Some(SessionBackendKind::Memcached),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionBackendKind::Memory => "Memory",
            SessionBackendKind::File => "File",
            SessionBackendKind::Sqlite => "Sqlite",
            SessionBackendKind::Redis => "Redis",
            SessionBackendKind::Memcached => "Memcached",
        };
        f.write_str(name)
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend type
    pub backend: SessionBackendKind,
    /// Connection URL (SQL, Redis, Memcached)
    pub url: String,
    /// Root directory (file backend)
    pub root: Option<PathBuf>,
    /// Table name (SQL backend)
    pub table: String,
    /// Logical namespace: cookie name, key prefix, directory name
    pub name: String,
    /// Time until the backend record expires
    pub lifetime: Duration,
    /// Upper bound for `lifetime`
    pub max_lifetime: Duration,
    /// How identifiers are generated
    pub id_strategy: IdStrategy,
    /// Replace client-supplied identifiers that have no backend record
    pub strict_ids: bool,
    /// Override the backend's default persistence policy (whole-state backends only)
    pub policy: Option<PersistencePolicy>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackendKind::Memory,
            url: String::new(),
            root: None,
            table: "sessions".to_string(),
            name: "app".to_string(),
            lifetime: Duration::from_secs(7200),
            max_lifetime: Duration::from_secs(86400 * 7),
            id_strategy: IdStrategy::default(),
            strict_ids: false,
            policy: None,
        }
    }
}

impl SessionConfig {
    /// In-process memory configuration.
    pub fn memory() -> Self {
        Self::default()
    }

    /// File backend configuration rooted at `root`.
    pub fn file(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: SessionBackendKind::File,
            root: Some(root.into()),
            ..Default::default()
        }
    }

    /// SQLite configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel_session::SessionConfig;
    ///
    /// let config = SessionConfig::sqlite("sqlite://sessions.db").unwrap();
    /// assert_eq!(config.table, "sessions");
    /// ```
    pub fn sqlite(url: &str) -> SessionResult<Self> {
        if !url.starts_with("sqlite:") {
            return Err(SessionError::InvalidUrl(
                "SQLite URL must start with sqlite:".to_string(),
            ));
        }

        Ok(Self {
            backend: SessionBackendKind::Sqlite,
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Redis configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel_session::SessionConfig;
    ///
    /// let config = SessionConfig::redis("redis://localhost:6379").unwrap();
    /// ```
    pub fn redis(url: &str) -> SessionResult<Self> {
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(SessionError::InvalidUrl(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(Self {
            backend: SessionBackendKind::Redis,
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Memcached configuration. Accepts `memcache://host:port` or `host:port`.
    pub fn memcached(url: &str) -> SessionResult<Self> {
        let url = if url.starts_with("memcache://") {
            url.to_string()
        } else if url.contains(':') && !url.contains("://") {
            format!("memcache://{}", url)
        } else {
            return Err(SessionError::InvalidUrl(format!(
                "Invalid Memcached URL: {}. Expected 'memcache://host:port' or 'host:port'",
                url
            )));
        };

        Ok(Self {
            backend: SessionBackendKind::Memcached,
            url,
            ..Default::default()
        })
    }

    /// Load configuration from `SATCHEL_SESSION_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are errors.
    pub fn from_env() -> SessionResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SessionResult<Self> {
        let mut config = match lookup("SATCHEL_SESSION_BACKEND") {
            None => Self::default(),
            Some(raw) => {
                let kind = SessionBackendKind::from_str(&raw)
                    .ok_or_else(|| SessionError::Config(format!("unknown backend: {}", raw)))?;
                let url = lookup("SATCHEL_SESSION_URL").unwrap_or_default();
                match kind {
                    SessionBackendKind::Memory => Self::memory(),
                    SessionBackendKind::File => {
                        let root = lookup("SATCHEL_SESSION_ROOT").ok_or_else(|| {
                            SessionError::Config("SATCHEL_SESSION_ROOT is required".to_string())
                        })?;
                        Self::file(root)
                    }
                    SessionBackendKind::Sqlite => Self::sqlite(&url)?,
                    SessionBackendKind::Redis => Self::redis(&url)?,
                    SessionBackendKind::Memcached => Self::memcached(&url)?,
                }
            }
        };

        if let Some(name) = lookup("SATCHEL_SESSION_NAME") {
            config = config.with_name(&name);
        }

        if let Some(raw) = lookup("SATCHEL_SESSION_MAX_LIFETIME") {
            config = config.with_max_lifetime(Duration::from_secs(parse_secs(&raw)?));
        }

        if let Some(raw) = lookup("SATCHEL_SESSION_LIFETIME") {
            config = config.with_lifetime(Duration::from_secs(parse_secs(&raw)?));
        }

        if let Some(table) = lookup("SATCHEL_SESSION_TABLE") {
            config = config.with_table(&table);
        }

        if let Some(raw) = lookup("SATCHEL_SESSION_ID_STRATEGY") {
            let strategy = IdStrategy::from_str(&raw)
                .ok_or_else(|| SessionError::Config(format!("unknown id strategy: {}", raw)))?;
            config = config.with_id_strategy(strategy);
        }

        if let Some(raw) = lookup("SATCHEL_SESSION_STRICT") {
            config = config.with_strict_ids(raw == "1" || raw.eq_ignore_ascii_case("true"));
        }

        if let Some(raw) = lookup("SATCHEL_SESSION_POLICY") {
            let policy = PersistencePolicy::from_str(&raw)
                .ok_or_else(|| SessionError::Config(format!("unknown policy: {}", raw)))?;
            config = config.with_policy(policy);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the session namespace.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the session lifetime. Clamped to `max_lifetime`.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime.min(self.max_lifetime);
        self
    }

    /// Set the maximum session lifetime.
    pub fn with_max_lifetime(mut self, max: Duration) -> Self {
        self.max_lifetime = max;
        self.lifetime = self.lifetime.min(max);
        self
    }

    /// Set the SQL table name.
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Set the identifier strategy.
    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Replace unknown client-supplied identifiers on start.
    pub fn with_strict_ids(mut self, strict: bool) -> Self {
        self.strict_ids = strict;
        self
    }

    /// Override the persistence policy of a whole-state backend.
    pub fn with_policy(mut self, policy: PersistencePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Check the settings that would otherwise fail later at runtime.
    pub fn validate(&self) -> SessionResult<()> {
        if self.name.is_empty()
            || !self
                .name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(SessionError::Config(format!(
                "session name must be non-empty [A-Za-z0-9_-]: {:?}",
                self.name
            )));
        }

        if self.lifetime.is_zero() {
            return Err(SessionError::Config("lifetime must be positive".to_string()));
        }

        if self.backend == SessionBackendKind::File && self.root.is_none() {
            return Err(SessionError::Config("file backend requires a root".to_string()));
        }

        if self.backend == SessionBackendKind::Sqlite && !is_sql_identifier(&self.table) {
            return Err(SessionError::Config(format!("invalid table name: {}", self.table)));
        }

        Ok(())
    }

    /// Build the cache key for a session identifier.
    pub fn session_key(&self, session_id: &str) -> String {
        format!("{}:{}", self.name, session_id)
    }
}

fn parse_secs(raw: &str) -> SessionResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| SessionError::Config(format!("expected seconds, got {:?}", raw)))
}

pub(crate) fn is_sql_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.as_bytes()[0].is_ascii_digit()
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
