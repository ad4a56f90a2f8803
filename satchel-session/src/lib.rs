//! Session state with one contract over several storage backends.
//!
//! A [`Session`] holds the state for one request. It is backed by a
//! [`SessionStore`] shared by every session in the process. Stores differ
//! in *how* they persist, never in what a caller observes:
//!
//! | Store | Record | Default policy | Flash | Malformed record |
//! |---|---|---|---|---|
//! | [`MemoryStore`] | in-process map | lazy | yes | n/a |
//! | [`FileStore`] | one JSON file per session | eager | yes | error |
//! | `SqlStore` | one row per key | eager (always) | no | error |
//! | `RedisSessionStore` | one hash per session | eager (always) | yes | error |
//! | `MemcachedSessionStore` | one JSON blob per session | lazy | no | treated as empty |
//!
//! Eager stores write inside every mutating call. Lazy stores keep
//! mutations in memory until [`Session::save`]. Whole-state stores accept
//! either policy through `with_policy`.
//!
//! # Features
//!
//! - `redis` - Redis session storage (enabled by default)
//! - `sqlite` - SQLite session storage via `sqlx` (enabled by default)
//! - `memcached` - Memcached session storage (requires opt-in)
//! - `memcached-tls` - TLS for Memcached connections
//!
//! # Examples
//!
//! ## Request cycle
//!
//! ```
//! use satchel_session::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let manager = SessionManager::connect(SessionConfig::memory()).await?;
//!
//!     // First request: no identifier from the client yet
//!     let mut session = manager.open(None);
//!     session.start().await?;
//!     session.set("cart", vec![1, 2, 3]).await?;
//!     session.flash()?.set("notice", "Added to cart").await?;
//!     session.save().await?;
//!
//!     // Send this back to the client as a cookie
//!     let directive = session.directive().unwrap();
//!
//!     // Next request
//!     let mut session = manager.open(Some(&directive.id));
//!     session.start().await?;
//!     let cart: Vec<i32> = session.get_or("cart", Vec::new());
//!     let notice: Option<String> = session.flash()?.get("notice").await?;
//!
//!     assert_eq!(cart, vec![1, 2, 3]);
//!     assert_eq!(notice.as_deref(), Some("Added to cart"));
//!
//!     // After login, rotate the identifier but keep the data
//!     session.regenerate().await?;
//!
//!     // Logout
//!     session.destroy().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Redis Session Store
//!
//! ```no_run
//! use satchel_session::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let config = SessionConfig::redis("redis://localhost:6379")?.with_name("myapp");
//!     let manager = SessionManager::connect(config).await?;
//!
//!     let mut session = manager.open(None);
//!     session.start().await?;
//!     session.set("user_id", 123).await?; // written to Redis here
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Memcached Session Store (requires `memcached` feature)
//!
//! ```ignore
//! use satchel_session::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let config = SessionConfig::memcached("memcache://localhost:11211")?;
//!     let manager = SessionManager::connect(config).await?;
//!
//!     let mut session = manager.open(None);
//!     session.start().await?;
//!     session.set("user_id", 123).await?;
//!     session.save().await?; // lazy: written here
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod file;
pub mod flash;
pub mod id;
pub mod manager;
pub mod memory;
pub mod policy;
pub mod session;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_session;

#[cfg(feature = "memcached")]
pub mod memcached_session;

#[cfg(feature = "sqlite")]
pub mod sql_session;

pub use config::{SessionBackendKind, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use file::FileStore;
pub use flash::{FLASH_KEY, Flash};
pub use id::{IdGenerator, IdStrategy, is_valid_id};
pub use manager::{SessionManager, open_backend};
pub use memory::MemoryStore;
pub use policy::{Granularity, PersistencePolicy};
pub use session::{IdentifierDirective, Session};
pub use traits::{SessionStore, State};

#[cfg(feature = "redis")]
pub use redis_session::RedisSessionStore;

#[cfg(feature = "memcached")]
pub use memcached_session::MemcachedSessionStore;

#[cfg(feature = "sqlite")]
pub use sql_session::SqlStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{SessionBackendKind, SessionConfig};
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::flash::Flash;
    pub use crate::manager::{SessionManager, open_backend};
    pub use crate::policy::PersistencePolicy;
    pub use crate::session::{IdentifierDirective, Session};
    pub use crate::traits::{SessionStore, State};
    pub use crate::{FileStore, MemoryStore};

    #[cfg(feature = "redis")]
    pub use crate::redis_session::RedisSessionStore;

    #[cfg(feature = "memcached")]
    pub use crate::memcached_session::MemcachedSessionStore;

    #[cfg(feature = "sqlite")]
    pub use crate::sql_session::SqlStore;
}
