//! Relational session storage (SQLite via `sqlx`).
//!
//! This module requires the `sqlite` feature flag.
//!
//! # Table Setup
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS sessions (
//!     id     TEXT    NOT NULL,
//!     "key"  TEXT    NOT NULL,
//!     value  TEXT    NOT NULL,
//!     expiry INTEGER NOT NULL,
//!     PRIMARY KEY (id, "key")
//! );
//! ```
//!
//! [`SqlStore::ensure_schema`] runs this statement for you.

use crate::config::is_sql_identifier;
use crate::error::{SessionError, SessionResult};
use crate::policy::{Granularity, PersistencePolicy, expires_at};
use crate::traits::{SessionStore, State};
use async_trait::async_trait;
use chrono::Utc;
use satchel_log::{debug, error};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::Duration;

/// Session store keeping one row per `(session id, key)`.
///
/// Values are stored as JSON text, so nested values survive the round
/// trip unchanged. Every mutation writes through (per-key granularity);
/// multi-key updates from `set_many` are not atomic. `write` upserts
/// the given keys and leaves the record's other keys in place.
///
/// Decode policy: **fail-closed**. A row whose value is not valid JSON
/// makes the whole read fail with [`SessionError::Decode`].
///
/// Flash messages are not supported.
///
/// # Examples
///
/// ```no_run
/// use satchel_session::SqlStore;
///
/// # async fn example() -> satchel_session::SessionResult<()> {
/// let store = SqlStore::connect("sqlite://sessions.db", "sessions").await?;
/// store.ensure_schema().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: SqlitePool,
    table: String,
}

impl SqlStore {
    /// Connect to `url` and use `table` for session rows.
    pub async fn connect(url: &str, table: &str) -> SessionResult<Self> {
        let mut options = SqlitePoolOptions::new();
        // Every connection to an in-memory database is a separate database.
        if url.contains(":memory:") || url.contains("mode=memory") {
            options = options.max_connections(1);
        }

        let pool = options
            .connect(url)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        Self::from_pool(pool, table)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool, table: &str) -> SessionResult<Self> {
        if !is_sql_identifier(table) {
            return Err(SessionError::Config(format!("invalid table name: {}", table)));
        }

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Create the session table if it does not exist.
    pub async fn ensure_schema(&self) -> SessionResult<()> {
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                id TEXT NOT NULL,
                "key" TEXT NOT NULL,
                value TEXT NOT NULL,
                expiry INTEGER NOT NULL,
                PRIMARY KEY (id, "key")
            )"#,
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!(fields: { "table" => self.table }, "Session table ready");
        Ok(())
    }

    /// Rows of an expired record must not come back when a key is written.
    fn drop_expired_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = ? AND expiry <= ?", self.table)
    }

    fn refresh_sql(&self) -> String {
        format!("UPDATE {} SET expiry = ? WHERE id = ?", self.table)
    }

    fn upsert_sql(&self) -> String {
        format!(
            r#"INSERT INTO {} (id, "key", value, expiry) VALUES (?, ?, ?, ?)
               ON CONFLICT (id, "key") DO UPDATE SET value = excluded.value, expiry = excluded.expiry"#,
            self.table
        )
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

#[async_trait]
impl SessionStore for SqlStore {
    fn backend_name(&self) -> &'static str {
        "sql"
    }

    fn granularity(&self) -> Granularity {
        Granularity::PerKey
    }

    fn policy(&self) -> PersistencePolicy {
        PersistencePolicy::Eager
    }

    fn supports_flash(&self) -> bool {
        false
    }

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ? AND expiry > ?", self.table);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(session_id)
            .bind(now())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn read(&self, session_id: &str) -> SessionResult<Option<State>> {
        let sql = format!(
            r#"SELECT "key", value FROM {} WHERE id = ? AND expiry > ?"#,
            self.table
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .bind(session_id)
            .bind(now())
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut state = State::with_capacity(rows.len());
        for (key, raw) in rows {
            let value = serde_json::from_str(&raw).map_err(|e| {
                error!(fields: { "session_id" => session_id, "key" => key }, "Session row is malformed: {}", e);
                SessionError::decode(session_id, format!("key {}: {}", key, e))
            })?;
            state.insert(key, value);
        }

        Ok(Some(state))
    }

    async fn write(&self, session_id: &str, state: &State, lifetime: Duration) -> SessionResult<()> {
        let expiry = expires_at(lifetime).timestamp();
        let upsert = self.upsert_sql();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&self.drop_expired_sql())
            .bind(session_id)
            .bind(now())
            .execute(&mut *tx)
            .await?;
        for (key, value) in state {
            sqlx::query(&upsert)
                .bind(session_id)
                .bind(key)
                .bind(serde_json::to_string(value)?)
                .bind(expiry)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(&self.refresh_sql())
            .bind(expiry)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn write_key(
        &self,
        session_id: &str,
        key: &str,
        value: &serde_json::Value,
        lifetime: Duration,
    ) -> SessionResult<()> {
        let expiry = expires_at(lifetime).timestamp();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&self.drop_expired_sql())
            .bind(session_id)
            .bind(now())
            .execute(&mut *tx)
            .await?;
        sqlx::query(&self.upsert_sql())
            .bind(session_id)
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .bind(expiry)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&self.refresh_sql())
            .bind(expiry)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.table);
        sqlx::query(&sql).bind(session_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_key(&self, session_id: &str, key: &str) -> SessionResult<()> {
        let sql = format!(r#"DELETE FROM {} WHERE id = ? AND "key" = ?"#, self.table);
        sqlx::query(&sql)
            .bind(session_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<()> {
        let clear = format!("DELETE FROM {} WHERE id = ?", self.table);
        let moved = format!("UPDATE {} SET id = ? WHERE id = ?", self.table);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&clear).bind(new_id).execute(&mut *tx).await?;
        sqlx::query(&moved)
            .bind(new_id)
            .bind(old_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn annotate_expiry(&self, session_id: &str, lifetime: Duration) -> SessionResult<()> {
        let sql = format!(
            "UPDATE {} SET expiry = ? WHERE id = ? AND expiry > ?",
            self.table
        );
        sqlx::query(&sql)
            .bind(expires_at(lifetime).timestamp())
            .bind(session_id)
            .bind(now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> SessionResult<usize> {
        let sql = format!("DELETE FROM {} WHERE expiry <= ?", self.table);
        let result = sqlx::query(&sql).bind(now()).execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqlStore {
        let store = SqlStore::connect("sqlite::memory:", "sessions").await.unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        assert!(SqlStore::from_pool(pool, "sessions; DROP TABLE x").is_err());
    }

    #[tokio::test]
    async fn test_one_row_per_key() {
        let store = store().await;
        let ttl = Duration::from_secs(60);
        store.write_key("s1", "a", &json!(1), ttl).await.unwrap();
        store.write_key("s1", "b", &json!({"x": [1, 2]}), ttl).await.unwrap();
        store.write_key("s1", "a", &json!(2), ttl).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE id = 's1'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 2);

        let state = store.read("s1").await.unwrap().unwrap();
        assert_eq!(state["a"], json!(2));
        assert_eq!(state["b"], json!({"x": [1, 2]}));
    }

    #[tokio::test]
    async fn test_write_key_refreshes_live_siblings() {
        let store = store().await;
        let ttl = Duration::from_secs(60);
        store.write_key("s1", "a", &json!(1), ttl).await.unwrap();
        store
            .write_key("s1", "b", &json!(2), Duration::from_secs(3600))
            .await
            .unwrap();

        let expiries: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT expiry FROM sessions WHERE id = 's1'")
            .fetch_all(&store.pool)
            .await
            .unwrap();
        assert_eq!(expiries.len(), 1);
        assert!(expiries[0] > now() + 60);
    }

    #[tokio::test]
    async fn test_write_key_does_not_revive_expired_rows() {
        let store = store().await;
        store.write_key("s1", "user_id", &json!(42), Duration::ZERO).await.unwrap();
        assert_eq!(store.read("s1").await.unwrap(), None);

        store
            .write_key("s1", "cart", &json!(1), Duration::from_secs(60))
            .await
            .unwrap();

        let state = store.read("s1").await.unwrap().unwrap();
        assert!(!state.contains_key("user_id"));
        assert_eq!(state.get("cart"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_write_upserts_and_keeps_other_keys() {
        let store = store().await;
        let ttl = Duration::from_secs(60);
        store.write_key("s1", "a", &json!(1), ttl).await.unwrap();

        let mut state = State::new();
        state.insert("b".into(), json!(2));
        store.write("s1", &state, ttl).await.unwrap();

        let stored = store.read("s1").await.unwrap().unwrap();
        assert_eq!(stored.get("a"), Some(&json!(1)));
        assert_eq!(stored.get("b"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_write_drops_expired_keys() {
        let store = store().await;
        store.write_key("s1", "stale", &json!(1), Duration::ZERO).await.unwrap();

        let mut state = State::new();
        state.insert("fresh".into(), json!(2));
        store.write("s1", &state, Duration::from_secs(60)).await.unwrap();

        let stored = store.read("s1").await.unwrap().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_malformed_row_fails_closed() {
        let store = store().await;
        sqlx::query(r#"INSERT INTO sessions (id, "key", value, expiry) VALUES ('s1', 'k', '{oops', ?)"#)
            .bind(now() + 60)
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(matches!(
            store.read("s1").await,
            Err(SessionError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = store().await;
        store.write_key("live", "k", &json!(1), Duration::from_secs(60)).await.unwrap();
        store.write_key("dead", "k", &json!(1), Duration::ZERO).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.exists("live").await.unwrap());
        assert!(!store.exists("dead").await.unwrap());
    }

    #[tokio::test]
    async fn test_flash_is_unsupported() {
        assert!(!store().await.supports_flash());
    }
}
