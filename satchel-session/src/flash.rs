//! Read-once flash messages.
//!
//! Flash messages live in the session state under a reserved key. A
//! message set during one request is promoted on the next
//! [`Session::start`] and can be read exactly once during that request.
//! Anything not read by then is dropped on the start after.

use crate::error::SessionResult;
use crate::session::Session;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// State key holding the flash messages.
pub const FLASH_KEY: &str = "_flash";

/// The two generations of flash messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct FlashBag {
    /// Readable during this request.
    #[serde(default)]
    pub current: Map<String, Value>,
    /// Readable during the next request.
    #[serde(default)]
    pub next: Map<String, Value>,
}

impl FlashBag {
    /// Drop unread messages and promote the next generation.
    pub fn rotate(&mut self) {
        self.current = std::mem::take(&mut self.next);
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.next.is_empty()
    }
}

/// Flash message view over a [`Session`].
///
/// Obtained from [`Session::flash`]. The view only borrows the session;
/// every change goes through it and follows its persistence policy.
///
/// ```
/// use satchel_session::{IdStrategy, MemoryStore, Session};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> satchel_session::SessionResult<()> {
/// let store = Arc::new(MemoryStore::new());
/// let mut first = Session::new(store.clone(), Arc::new(IdStrategy::default()));
/// first.start().await?;
/// first.flash()?.set("notice", "Profile saved").await?;
/// first.save().await?;
///
/// let id = first.id().unwrap().to_string();
/// let mut second = Session::new(store, Arc::new(IdStrategy::default())).with_id(id);
/// second.start().await?;
/// let notice: Option<String> = second.flash()?.get("notice").await?;
/// assert_eq!(notice.as_deref(), Some("Profile saved"));
/// # Ok(())
/// # }
/// ```
pub struct Flash<'a> {
    session: &'a mut Session,
}

impl<'a> Flash<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// Set a message for the next request, replacing any pending one.
    pub async fn set<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        let value = serde_json::to_value(value)?;
        let mut bag = self.session.flash_bag()?;
        bag.next.insert(key.to_string(), value);
        self.session.put_flash_bag(bag).await
    }

    /// Append a message to a list for the next request.
    pub async fn add<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        let value = serde_json::to_value(value)?;
        let mut bag = self.session.flash_bag()?;
        let entry = match bag.next.remove(key) {
            None => vec![value],
            Some(Value::Array(mut items)) => {
                items.push(value);
                items
            }
            Some(single) => vec![single, value],
        };
        bag.next.insert(key.to_string(), Value::Array(entry));
        self.session.put_flash_bag(bag).await
    }

    /// Read and consume a message set by the previous request.
    pub async fn get<T: DeserializeOwned>(&mut self, key: &str) -> SessionResult<Option<T>> {
        let mut bag = self.session.flash_bag()?;
        let Some(value) = bag.current.remove(key) else {
            return Ok(None);
        };
        self.session.put_flash_bag(bag).await?;
        Ok(serde_json::from_value(value).ok())
    }

    /// Read a message without consuming it.
    pub fn peek<T: DeserializeOwned>(&self, key: &str) -> SessionResult<Option<T>> {
        let bag = self.session.flash_bag()?;
        Ok(bag
            .current
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok()))
    }

    /// Check whether a readable message exists.
    pub fn has(&self, key: &str) -> SessionResult<bool> {
        Ok(self.session.flash_bag()?.current.contains_key(key))
    }

    /// Read and consume every readable message.
    pub async fn all(&mut self) -> SessionResult<Map<String, Value>> {
        let mut bag = self.session.flash_bag()?;
        let current = std::mem::take(&mut bag.current);
        if !current.is_empty() {
            self.session.put_flash_bag(bag).await?;
        }
        Ok(current)
    }

    /// Drop readable and pending messages.
    pub async fn clear(&mut self) -> SessionResult<()> {
        self.session.put_flash_bag(FlashBag::default()).await
    }
}
