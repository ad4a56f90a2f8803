//! Integration tests for common Satchel workflows.
//!
//! These tests walk through the request cycles an application runs most.

use satchel::prelude::*;
use satchel::is_valid_id;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
    roles: Vec<String>,
}

// =============================================================================
// Login / Logout
// =============================================================================

#[tokio::test]
async fn test_login_rotates_identifier_and_keeps_cart() {
    let manager = SessionManager::connect(SessionConfig::memory()).await.unwrap();

    // Anonymous visitor fills a cart
    let mut session = manager.open(None);
    session.start().await.unwrap();
    session.set("cart", vec![7, 8]).await.unwrap();
    session.save().await.unwrap();
    let anonymous_id = session.directive().unwrap().id;

    // Login request
    let mut session = manager.open(Some(&anonymous_id));
    session.start().await.unwrap();
    session
        .set(
            "user",
            User {
                id: 1,
                name: "ada".into(),
                roles: vec!["admin".into()],
            },
        )
        .await
        .unwrap();
    session.regenerate().await.unwrap();
    session.save().await.unwrap();
    let user_id = session.directive().unwrap().id;
    assert_ne!(anonymous_id, user_id);

    // The old cookie no longer resolves
    let mut stolen = manager.open(Some(&anonymous_id));
    stolen.start().await.unwrap();
    assert!(stolen.is_empty());

    // The new one carries everything
    let mut session = manager.open(Some(&user_id));
    session.start().await.unwrap();
    assert_eq!(session.get::<Vec<i32>>("cart"), Some(vec![7, 8]));
    assert_eq!(session.get::<User>("user").map(|u| u.name), Some("ada".into()));

    // Logout
    session.destroy().await.unwrap();
    session.save().await.unwrap();
    assert!(!manager.store().exists(&user_id).await.unwrap());
}

#[tokio::test]
async fn test_flash_after_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::connect(SessionConfig::file(dir.path()).with_name("web"))
        .await
        .unwrap();

    // POST handler
    let mut session = manager.open(None);
    session.start().await.unwrap();
    session.flash().unwrap().set("notice", "Saved").await.unwrap();
    session.save().await.unwrap();
    let id = session.directive().unwrap().id;

    // GET after redirect
    let mut session = manager.open(Some(&id));
    session.start().await.unwrap();
    let notice: Option<String> = session.flash().unwrap().get("notice").await.unwrap();
    assert_eq!(notice.as_deref(), Some("Saved"));
    session.save().await.unwrap();

    // Reload
    let mut session = manager.open(Some(&id));
    session.start().await.unwrap();
    assert!(!session.flash().unwrap().has("notice").unwrap());
}

// =============================================================================
// Transport edge
// =============================================================================

#[tokio::test]
async fn test_directive_uses_config() {
    let config = SessionConfig::memory()
        .with_name("shop")
        .with_lifetime(Duration::from_secs(600));
    let manager = SessionManager::connect(config).await.unwrap();

    let mut session = manager.open(None);
    session.start().await.unwrap();
    let directive = session.directive().unwrap();

    assert_eq!(directive.name, "shop");
    assert_eq!(directive.max_age, Duration::from_secs(600));
    assert!(is_valid_id(&directive.id));
}

#[tokio::test]
async fn test_strict_mode_rejects_fixated_identifier() {
    let config = SessionConfig::memory().with_strict_ids(true);
    let manager = SessionManager::connect(config).await.unwrap();

    let planted = "aaaaaaaaaaaaaaaaaaaaaaaa";
    let mut session = manager.open(Some(planted));
    session.start().await.unwrap();
    assert_ne!(session.id(), Some(planted));
}

#[tokio::test]
async fn test_custom_identifier_generator() {
    struct Counter(std::sync::atomic::AtomicU64);

    impl IdGenerator for Counter {
        fn issue(&self) -> String {
            let n = self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            format!("session-{:016}", n)
        }
    }

    let manager = SessionManager::connect(SessionConfig::memory())
        .await
        .unwrap()
        .with_generator(Arc::new(Counter(Default::default())));

    let mut session = manager.open(None);
    session.start().await.unwrap();
    assert_eq!(session.id(), Some("session-0000000000000000"));

    session.regenerate().await.unwrap();
    assert_eq!(session.id(), Some("session-0000000000000001"));
}

// =============================================================================
// Persistence policy
// =============================================================================

#[tokio::test]
async fn test_lazy_policy_discards_unsaved_request() {
    let manager = SessionManager::connect(SessionConfig::memory()).await.unwrap();
    let mut session = manager.open(None);
    session.start().await.unwrap();
    session.set("draft", "kept").await.unwrap();
    session.save().await.unwrap();
    let id = session.directive().unwrap().id;

    // This request fails before save
    let mut session = manager.open(Some(&id));
    session.start().await.unwrap();
    session.set("draft", "lost").await.unwrap();
    drop(session);

    let mut session = manager.open(Some(&id));
    session.start().await.unwrap();
    assert_eq!(session.get::<String>("draft").as_deref(), Some("kept"));
}

#[tokio::test]
async fn test_eager_policy_survives_missing_save() {
    let config = SessionConfig::memory().with_policy(PersistencePolicy::Eager);
    let manager = SessionManager::connect(config).await.unwrap();

    let mut session = manager.open(None);
    session.start().await.unwrap();
    session.set("step", 3).await.unwrap();
    let id = session.directive().unwrap().id;
    drop(session);

    let mut session = manager.open(Some(&id));
    session.start().await.unwrap();
    assert_eq!(session.get::<i32>("step"), Some(3));
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_rejects_flash() {
    let config = SessionConfig::sqlite("sqlite::memory:").unwrap();
    let manager = SessionManager::connect(config).await.unwrap();

    let mut session = manager.open(None);
    session.start().await.unwrap();
    let err = session.flash().err().unwrap();
    assert!(matches!(err, SessionError::UnsupportedCapability { backend: "sql", .. }));

    // Plain keys still work and are written immediately
    session.set("k", "v").await.unwrap();
    let id = session.directive().unwrap().id;
    assert!(manager.store().exists(&id).await.unwrap());
}

// =============================================================================
// Logging
// =============================================================================

#[test]
fn test_log_level_control() {
    satchel::log::init();
    satchel::log::set_level(satchel::log::Level::Warn);
    assert!(satchel::log::is_level_enabled(satchel::log::Level::Error));
    assert!(!satchel::log::is_level_enabled(satchel::log::Level::Info));
    satchel::log::set_level(satchel::log::Level::Info);
}
