//! Error types for session operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
///
/// A missing record or key is never an error: reads resolve to `None`,
/// existence checks to `false`, deletes are no-ops.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Memcached-specific error
    #[cfg(feature = "memcached")]
    #[error("Memcached error: {0}")]
    Memcached(#[from] memcache::MemcacheError),

    /// SQL backend error
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stored bytes do not parse as session state
    #[error("Malformed session record {id}: {reason}")]
    Decode { id: String, reason: String },

    /// Value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation the backend cannot carry
    #[error("{backend} backend does not support {capability}")]
    UnsupportedCapability {
        backend: &'static str,
        capability: &'static str,
    },

    /// Mutation attempted before `start()`
    #[error("Session has not been started")]
    NotStarted,

    /// Write into the reserved flash namespace
    #[error("Key is reserved for flash messages: {0}")]
    ReservedKey(String),

    /// Identifier outside the accepted alphabet or length
    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl SessionError {
    pub(crate) fn decode(id: &str, reason: impl ToString) -> Self {
        SessionError::Decode {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unsupported(backend: &'static str, capability: &'static str) -> Self {
        SessionError::UnsupportedCapability {
            backend,
            capability,
        }
    }

    /// Whether this error means the backend could not be reached.
    pub fn is_connection(&self) -> bool {
        match self {
            SessionError::Connection(_) => true,
            #[cfg(feature = "redis")]
            SessionError::Redis(e) => e.is_connection_refusal() || e.is_io_error(),
            #[cfg(feature = "sqlite")]
            SessionError::Database(e) => {
                matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed)
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::decode("abc", "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Malformed session record abc: expected value at line 1"
        );

        let err = SessionError::unsupported("sql", "flash messages");
        assert_eq!(err.to_string(), "sql backend does not support flash messages");
    }

    #[test]
    fn test_connection_classification() {
        assert!(SessionError::Connection("refused".into()).is_connection());
        assert!(!SessionError::NotStarted.is_connection());
    }
}
