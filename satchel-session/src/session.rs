//! Per-request session state machine.

use crate::error::{SessionError, SessionResult};
use crate::flash::{FLASH_KEY, Flash, FlashBag};
use crate::id::IdGenerator;
use crate::policy::{Granularity, PersistencePolicy};
use crate::traits::{SessionStore, State};
use satchel_log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Instruction for the transport layer to carry the identifier to the
/// next request, typically as a cookie named `name` with `max_age`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierDirective {
    /// Cookie or header name
    pub name: String,
    /// Current session identifier
    pub id: String,
    /// How long the client should keep the identifier
    pub max_age: Duration,
}

/// A session bound to one request.
///
/// A session starts unstarted. [`start`](Session::start) resolves the
/// identifier and loads the stored record; mutations are rejected with
/// [`SessionError::NotStarted`] until then. Reads are allowed at any time
/// and see the empty initial state before `start`.
///
/// Whether a mutation reaches the backend immediately depends on the
/// store: eager stores write inside the mutating call, lazy stores wait for
/// [`save`](Session::save).
///
/// Two sessions holding the same identifier are not coordinated. The last
/// write wins.
///
/// # Examples
///
/// ```
/// use satchel_session::{IdStrategy, MemoryStore, Session};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> satchel_session::SessionResult<()> {
/// let store = Arc::new(MemoryStore::new());
/// let mut session = Session::new(store.clone(), Arc::new(IdStrategy::default()));
///
/// session.start().await?;
/// session.set("cart", vec![1, 2, 3]).await?;
/// session.save().await?;
///
/// let id = session.id().unwrap().to_string();
/// let mut next = Session::new(store, Arc::new(IdStrategy::default())).with_id(id);
/// next.start().await?;
/// assert_eq!(next.get::<Vec<i32>>("cart"), Some(vec![1, 2, 3]));
/// # Ok(())
/// # }
/// ```
pub struct Session {
    id: Option<String>,
    name: String,
    lifetime: Duration,
    strict_ids: bool,
    state: State,
    started: bool,
    dirty: bool,
    store: Arc<dyn SessionStore>,
    generator: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("backend", &self.store.backend_name())
            .field("started", &self.started)
            .field("dirty", &self.dirty)
            .field("keys", &self.state.len())
            .finish()
    }
}

impl Session {
    /// Create an unstarted session with no identifier.
    pub fn new(store: Arc<dyn SessionStore>, generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            id: None,
            name: "app".to_string(),
            lifetime: Duration::from_secs(7200),
            strict_ids: false,
            state: State::new(),
            started: false,
            dirty: false,
            store,
            generator,
        }
    }

    /// Resume an identifier supplied by the client.
    ///
    /// The identifier is used as-is; [`SessionManager::open`](crate::SessionManager::open)
    /// validates inbound values before they get here.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the namespace used for the identifier directive.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the record lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Replace a supplied identifier on start if the store has no record for it.
    pub fn with_strict_ids(mut self, strict: bool) -> Self {
        self.strict_ids = strict;
        self
    }

    /// Current identifier, `None` until one is supplied or issued.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Session namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record lifetime.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Whether [`start`](Session::start) has run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether there are mutations not yet written (lazy stores only).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Shared store handle.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Identifier directive for the transport layer, once an identifier exists.
    pub fn directive(&self) -> Option<IdentifierDirective> {
        self.id.as_ref().map(|id| IdentifierDirective {
            name: self.name.clone(),
            id: id.clone(),
            max_age: self.lifetime,
        })
    }

    fn effective_policy(&self) -> PersistencePolicy {
        self.store
            .granularity()
            .forced_policy()
            .unwrap_or_else(|| self.store.policy())
    }

    /// Load the stored record and rotate flash messages.
    ///
    /// Issues an identifier if none was supplied. Calling `start` on a
    /// started session does nothing.
    pub async fn start(&mut self) -> SessionResult<()> {
        if self.started {
            return Ok(());
        }

        let id = match self.id.clone() {
            None => self.generator.issue(),
            Some(id) if self.strict_ids => {
                if self.store.exists(&id).await? {
                    id
                } else {
                    debug!(fields: { "backend" => self.store.backend_name() }, "Replacing unknown session identifier");
                    self.generator.issue()
                }
            }
            Some(id) => id,
        };

        let state = self.store.read(&id).await?.unwrap_or_default();

        self.id = Some(id);
        self.state = state;
        self.started = true;
        self.dirty = false;

        if self.store.supports_flash() && self.state.contains_key(FLASH_KEY) {
            let mut bag = self.flash_bag()?;
            bag.rotate();
            self.put_flash_bag(bag).await?;
        }

        debug!(fields: { "backend" => self.store.backend_name(), "keys" => self.len() }, "Session started");
        Ok(())
    }

    /// Get a value, `None` if missing or not deserializable as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a value or `default`.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Get the raw JSON value.
    pub fn get_value(&self, key: &str) -> Option<&serde_json::Value> {
        if key == FLASH_KEY {
            return None;
        }
        self.state.get(key)
    }

    /// Check whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        key != FLASH_KEY && self.state.contains_key(key)
    }

    /// Snapshot of all keys, flash messages excluded.
    pub fn all(&self) -> State {
        self.state
            .iter()
            .filter(|(k, _)| k.as_str() != FLASH_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of keys, flash messages excluded.
    pub fn len(&self) -> usize {
        self.state.len() - usize::from(self.state.contains_key(FLASH_KEY))
    }

    /// Check whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set a value.
    pub async fn set<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        self.ensure_writable(key)?;
        let value = serde_json::to_value(value)?;
        self.state.insert(key.to_string(), value);
        self.commit_key(key).await
    }

    /// Set several values with one write on whole-state stores.
    pub async fn set_many(&mut self, values: State) -> SessionResult<()> {
        self.ensure_started()?;
        if let Some(key) = values.keys().find(|k| k.as_str() == FLASH_KEY) {
            return Err(SessionError::ReservedKey(key.clone()));
        }

        let keys: Vec<String> = values.keys().cloned().collect();
        self.state.extend(values);
        match self.store.granularity() {
            Granularity::PerKey => {
                for key in &keys {
                    self.commit_key(key).await?;
                }
                Ok(())
            }
            Granularity::WholeState => self.commit_state().await,
        }
    }

    /// Remove a key. Missing keys are ignored.
    pub async fn delete(&mut self, key: &str) -> SessionResult<()> {
        self.ensure_writable(key)?;
        if self.state.remove(key).is_none() {
            return Ok(());
        }
        self.commit_key(key).await
    }

    /// Remove every key, pending flash messages included.
    pub async fn clear(&mut self) -> SessionResult<()> {
        self.ensure_started()?;
        self.state.clear();
        match self.effective_policy() {
            PersistencePolicy::Lazy => {
                self.dirty = true;
                Ok(())
            }
            PersistencePolicy::Eager => {
                let id = self.require_id()?;
                self.store.delete(id).await
            }
        }
    }

    /// Flush pending mutations, or slide the expiry when there are none.
    ///
    /// Does nothing before [`start`](Session::start). Safe to repeat.
    pub async fn save(&mut self) -> SessionResult<()> {
        if !self.started {
            return Ok(());
        }

        let id = self.require_id()?;
        if self.dirty {
            self.store.write(id, &self.state, self.lifetime).await?;
            self.dirty = false;
            return Ok(());
        }

        self.store.annotate_expiry(id, self.lifetime).await
    }

    /// Move the session to a fresh identifier, keeping its state.
    ///
    /// The stored record is renamed, so the old identifier no longer
    /// resolves. On error the session keeps its old identifier.
    pub async fn regenerate(&mut self) -> SessionResult<()> {
        self.ensure_started()?;
        let old_id = self.require_id()?.to_string();
        let new_id = self.generator.issue();

        if self.store.exists(&old_id).await? {
            self.store.rename(&old_id, &new_id).await?;
            self.store.annotate_expiry(&new_id, self.lifetime).await?;
        }

        info!(
            fields: { "backend" => self.store.backend_name(), "old_id" => old_id, "new_id" => new_id },
            "Session identifier regenerated"
        );
        self.id = Some(new_id);
        Ok(())
    }

    /// Delete the stored record, empty the state and move to a fresh identifier.
    pub async fn destroy(&mut self) -> SessionResult<()> {
        self.ensure_started()?;
        let id = self.require_id()?.to_string();
        self.store.delete(&id).await?;
        self.state.clear();
        self.dirty = false;

        info!(fields: { "backend" => self.store.backend_name(), "session_id" => id }, "Session destroyed");
        self.regenerate().await
    }

    /// Flash message view.
    ///
    /// Fails with [`SessionError::UnsupportedCapability`] on stores that
    /// cannot carry flash messages.
    pub fn flash(&mut self) -> SessionResult<Flash<'_>> {
        if !self.store.supports_flash() {
            return Err(SessionError::unsupported(self.store.backend_name(), "flash"));
        }
        Ok(Flash::new(self))
    }

    pub(crate) fn flash_bag(&self) -> SessionResult<FlashBag> {
        match self.state.get(FLASH_KEY) {
            None => Ok(FlashBag::default()),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                SessionError::decode(self.id.as_deref().unwrap_or_default(), format!("flash: {}", e))
            }),
        }
    }

    pub(crate) async fn put_flash_bag(&mut self, bag: FlashBag) -> SessionResult<()> {
        self.ensure_started()?;
        if bag.is_empty() {
            if self.state.remove(FLASH_KEY).is_none() {
                return Ok(());
            }
        } else {
            self.state
                .insert(FLASH_KEY.to_string(), serde_json::to_value(bag)?);
        }
        self.commit_key(FLASH_KEY).await
    }

    fn ensure_started(&self) -> SessionResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(SessionError::NotStarted)
        }
    }

    fn ensure_writable(&self, key: &str) -> SessionResult<()> {
        self.ensure_started()?;
        if key == FLASH_KEY {
            return Err(SessionError::ReservedKey(key.to_string()));
        }
        Ok(())
    }

    fn require_id(&self) -> SessionResult<&str> {
        self.id.as_deref().ok_or(SessionError::NotStarted)
    }

    /// Commit a single key that was just changed in memory.
    async fn commit_key(&mut self, key: &str) -> SessionResult<()> {
        match (self.effective_policy(), self.store.granularity()) {
            (PersistencePolicy::Lazy, _) => {
                self.dirty = true;
                Ok(())
            }
            (PersistencePolicy::Eager, Granularity::WholeState) => self.commit_state().await,
            (PersistencePolicy::Eager, Granularity::PerKey) => {
                let id = self.require_id()?;
                match self.state.get(key) {
                    Some(value) => self.store.write_key(id, key, value, self.lifetime).await,
                    None => self.store.delete_key(id, key).await,
                }
            }
        }
    }

    async fn commit_state(&mut self) -> SessionResult<()> {
        if self.effective_policy() == PersistencePolicy::Lazy {
            self.dirty = true;
            return Ok(());
        }
        let id = self.require_id()?;
        self.store.write(id, &self.state, self.lifetime).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdStrategy;
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn session(store: &MemoryStore) -> Session {
        Session::new(Arc::new(store.clone()), Arc::new(IdStrategy::UuidV4))
    }

    #[tokio::test]
    async fn test_mutation_before_start_is_rejected() {
        let store = MemoryStore::new();
        let mut s = session(&store);

        assert!(matches!(s.set("a", 1).await, Err(SessionError::NotStarted)));
        assert!(matches!(s.clear().await, Err(SessionError::NotStarted)));
        assert!(matches!(s.regenerate().await, Err(SessionError::NotStarted)));
        assert_eq!(s.get_or("a", 7), 7);
        assert!(!s.has("a"));
        s.save().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_start_issues_id_and_is_idempotent() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        assert!(s.directive().is_none());

        s.start().await.unwrap();
        let id = s.id().unwrap().to_string();
        s.set("k", "v").await.unwrap();
        s.start().await.unwrap();

        assert_eq!(s.id(), Some(id.as_str()));
        assert_eq!(s.get::<String>("k").as_deref(), Some("v"));
        assert!(s.is_started());
    }

    #[tokio::test]
    async fn test_lazy_store_waits_for_save() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.start().await.unwrap();
        s.set("k", 1).await.unwrap();

        assert!(s.is_dirty());
        assert!(store.is_empty().await);

        s.save().await.unwrap();
        assert!(!s.is_dirty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_eager_store_writes_through() {
        let store = MemoryStore::new().with_policy(PersistencePolicy::Eager);
        let mut s = session(&store);
        s.start().await.unwrap();
        s.set("k", 1).await.unwrap();

        let id = s.id().unwrap().to_string();
        let stored = store.read(&id).await.unwrap().unwrap();
        assert_eq!(stored.get("k"), Some(&json!(1)));
        assert!(!s.is_dirty());
    }

    #[tokio::test]
    async fn test_reserved_key_is_rejected() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.start().await.unwrap();

        assert!(matches!(s.set(FLASH_KEY, 1).await, Err(SessionError::ReservedKey(_))));
        assert!(matches!(s.delete(FLASH_KEY).await, Err(SessionError::ReservedKey(_))));

        let mut many = State::new();
        many.insert(FLASH_KEY.to_string(), json!(1));
        assert!(matches!(s.set_many(many).await, Err(SessionError::ReservedKey(_))));
    }

    #[tokio::test]
    async fn test_flash_is_hidden_from_reads() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.start().await.unwrap();
        s.set("user", "ada").await.unwrap();
        s.flash().unwrap().set("notice", "saved").await.unwrap();

        assert_eq!(s.len(), 1);
        assert!(!s.has(FLASH_KEY));
        assert!(s.get_value(FLASH_KEY).is_none());
        assert_eq!(s.all().len(), 1);
    }

    #[tokio::test]
    async fn test_strict_ids_replace_unknown_identifier() {
        let store = MemoryStore::new();
        let mut s = session(&store)
            .with_id("attacker-chosen-id-0001")
            .with_strict_ids(true);
        s.start().await.unwrap();
        assert_ne!(s.id(), Some("attacker-chosen-id-0001"));

        let mut lax = session(&store).with_id("attacker-chosen-id-0001");
        lax.start().await.unwrap();
        assert_eq!(lax.id(), Some("attacker-chosen-id-0001"));
    }

    #[tokio::test]
    async fn test_regenerate_without_record_only_changes_id() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.start().await.unwrap();
        s.set("k", 1).await.unwrap();
        let old = s.id().unwrap().to_string();

        s.regenerate().await.unwrap();
        assert_ne!(s.id(), Some(old.as_str()));
        assert_eq!(s.get::<i32>("k"), Some(1));
        assert!(s.is_dirty());
    }

    #[tokio::test]
    async fn test_directive_tracks_identifier() {
        let store = MemoryStore::new();
        let mut s = session(&store)
            .with_name("shop")
            .with_lifetime(Duration::from_secs(60));
        s.start().await.unwrap();

        let directive = s.directive().unwrap();
        assert_eq!(directive.name, "shop");
        assert_eq!(Some(directive.id.as_str()), s.id());
        assert_eq!(directive.max_age, Duration::from_secs(60));

        s.destroy().await.unwrap();
        assert_ne!(s.directive().unwrap().id, directive.id);
    }
}
