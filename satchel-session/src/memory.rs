//! In-process session storage.

use crate::error::SessionResult;
use crate::policy::{Granularity, PersistencePolicy, expires_at};
use crate::traits::{SessionStore, State};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryRecord {
    state: State,
    expires_at: DateTime<Utc>,
}

impl MemoryRecord {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Session store backed by a shared in-process map.
///
/// Cloning the store shares the map. Values are kept as JSON values, so
/// there is no encode step that could fail on load. Expired records are
/// treated as absent and removed by [`purge_expired`](SessionStore::purge_expired).
///
/// Defaults to [`PersistencePolicy::Lazy`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, MemoryRecord>>>,
    policy: PersistencePolicy,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            policy: PersistencePolicy::Lazy,
        }
    }

    /// Use a different persistence policy.
    pub fn with_policy(mut self, policy: PersistencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| !r.is_expired())
            .count()
    }

    /// Whether the store holds no live records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn granularity(&self) -> Granularity {
        Granularity::WholeState
    }

    fn policy(&self) -> PersistencePolicy {
        self.policy
    }

    fn supports_flash(&self) -> bool {
        true
    }

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        Ok(self
            .records
            .read()
            .await
            .get(session_id)
            .is_some_and(|r| !r.is_expired()))
    }

    async fn read(&self, session_id: &str) -> SessionResult<Option<State>> {
        Ok(self
            .records
            .read()
            .await
            .get(session_id)
            .filter(|r| !r.is_expired())
            .map(|r| r.state.clone()))
    }

    async fn write(&self, session_id: &str, state: &State, lifetime: Duration) -> SessionResult<()> {
        let record = MemoryRecord {
            state: state.clone(),
            expires_at: expires_at(lifetime),
        };
        self.records
            .write()
            .await
            .insert(session_id.to_string(), record);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        self.records.write().await.remove(session_id);
        Ok(())
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.remove(old_id)
            && !record.is_expired()
        {
            records.insert(new_id.to_string(), record);
        }
        Ok(())
    }

    async fn annotate_expiry(&self, session_id: &str, lifetime: Duration) -> SessionResult<()> {
        if let Some(record) = self.records.write().await.get_mut(session_id)
            && !record.is_expired()
        {
            record.expires_at = expires_at(lifetime);
        }
        Ok(())
    }

    async fn purge_expired(&self) -> SessionResult<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired());
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> State {
        let mut state = State::new();
        state.insert("user_id".into(), json!(123));
        state
    }

    #[tokio::test]
    async fn test_clones_share_records() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.write("s1", &state(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(other.read("s1").await.unwrap(), Some(state()));
        assert_eq!(other.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_records_are_absent() {
        let store = MemoryStore::new();
        store.write("s1", &state(), Duration::ZERO).await.unwrap();

        assert!(!store.exists("s1").await.unwrap());
        assert_eq!(store.read("s1").await.unwrap(), None);
        assert!(store.is_empty().await);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_annotate_expiry_revives_window() {
        let store = MemoryStore::new();
        store.write("s1", &state(), Duration::from_secs(1)).await.unwrap();
        store.annotate_expiry("s1", Duration::from_secs(3600)).await.unwrap();

        let records = store.records.read().await;
        assert!(records["s1"].expires_at > Utc::now() + chrono::Duration::seconds(3000));
    }

    #[test]
    fn test_default_policy_is_lazy() {
        assert_eq!(MemoryStore::new().policy(), PersistencePolicy::Lazy);
        assert_eq!(
            MemoryStore::new().with_policy(PersistencePolicy::Eager).policy(),
            PersistencePolicy::Eager
        );
    }
}
