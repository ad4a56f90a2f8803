//! Backend adapter contract.

use crate::error::{SessionError, SessionResult};
use crate::policy::{Granularity, PersistencePolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Session state: string keys to any JSON-shaped value.
pub type State = HashMap<String, serde_json::Value>;

/// Storage adapter for session records.
///
/// One adapter instance is shared by every session that uses it, so
/// implementations must be safe to call concurrently for different
/// identifiers. Two sessions holding the *same* identifier are not
/// coordinated: whichever writes last wins.
///
/// A missing record is never an error. `read` returns `Ok(None)`,
/// `exists` returns `Ok(false)`, and deletes are no-ops.
///
/// # Examples
///
/// ```
/// use satchel_session::{MemoryStore, SessionStore, State};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> satchel_session::SessionResult<()> {
/// let store = MemoryStore::new();
/// let mut state = State::new();
/// state.insert("user_id".into(), 42.into());
///
/// store.write("a1b2c3d4e5f6a7b8", &state, Duration::from_secs(60)).await?;
/// store.rename("a1b2c3d4e5f6a7b8", "f0e1d2c3b4a59687").await?;
///
/// assert!(!store.exists("a1b2c3d4e5f6a7b8").await?);
/// assert_eq!(store.read("f0e1d2c3b4a59687").await?, Some(state));
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short backend name used in errors and logs.
    fn backend_name(&self) -> &'static str;

    /// Record shape.
    fn granularity(&self) -> Granularity;

    /// When mutations are flushed. Per-key backends are always eager.
    fn policy(&self) -> PersistencePolicy;

    /// Whether the flash overlay can be stored in this backend.
    fn supports_flash(&self) -> bool;

    /// Check whether an unexpired record exists.
    async fn exists(&self, session_id: &str) -> SessionResult<bool>;

    /// Load the state stored under `session_id`.
    async fn read(&self, session_id: &str) -> SessionResult<Option<State>>;

    /// Store `state` and set the record's expiry to now + `lifetime`.
    ///
    /// Whole-state stores replace the record. Per-key stores upsert the
    /// keys in `state` and leave the record's other keys in place.
    async fn write(&self, session_id: &str, state: &State, lifetime: Duration) -> SessionResult<()>;

    /// Upsert a single key and refresh the record's expiry.
    async fn write_key(
        &self,
        session_id: &str,
        key: &str,
        value: &serde_json::Value,
        lifetime: Duration,
    ) -> SessionResult<()> {
        let _ = (session_id, key, value, lifetime);
        Err(SessionError::unsupported(self.backend_name(), "per-key writes"))
    }

    /// Remove the whole record.
    async fn delete(&self, session_id: &str) -> SessionResult<()>;

    /// Remove one key from the record.
    async fn delete_key(&self, session_id: &str, key: &str) -> SessionResult<()> {
        let _ = (session_id, key);
        Err(SessionError::unsupported(self.backend_name(), "per-key deletes"))
    }

    /// Move the record from `old_id` to `new_id`.
    ///
    /// Afterwards everything readable under `old_id` is readable under
    /// `new_id` and `old_id` no longer resolves. A record already stored
    /// under `new_id` is replaced. Missing `old_id` is a no-op.
    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<()>;

    /// Slide the expiry to now + `lifetime` without touching content.
    async fn annotate_expiry(&self, session_id: &str, lifetime: Duration) -> SessionResult<()>;

    /// Drop expired records. Backends with native TTLs return 0.
    async fn purge_expired(&self) -> SessionResult<usize> {
        Ok(0)
    }
}

/// Encode state as a JSON document.
pub(crate) fn encode_state(state: &State) -> SessionResult<String> {
    Ok(serde_json::to_string(state)?)
}

/// Decode a JSON document into state.
pub(crate) fn decode_state(session_id: &str, raw: &str) -> SessionResult<State> {
    serde_json::from_str(raw).map_err(|e| SessionError::decode(session_id, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_encoding_keeps_shape() {
        let mut state = State::new();
        state.insert("cart".into(), json!([1, 2, 3]));
        state.insert("profile".into(), json!({"name": "ada", "admin": false, "score": 1.5}));

        let raw = encode_state(&state).unwrap();
        assert_eq!(decode_state("id", &raw).unwrap(), state);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = decode_state("abc", "[1,2]").unwrap_err();
        assert!(matches!(err, SessionError::Decode { ref id, .. } if id == "abc"));
        assert!(decode_state("abc", "{not json").is_err());
    }
}
