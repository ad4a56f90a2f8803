//! Filesystem session storage.
//!
//! Layout: `{root}/{name}/{session_id}.json`, each file holding
//! `{"expires_at": <rfc3339>, "data": {...}}`.

use crate::error::{SessionError, SessionResult};
use crate::id::is_valid_id;
use crate::policy::{Granularity, PersistencePolicy, expires_at};
use crate::traits::{SessionStore, State};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use satchel_log::{debug, error};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at: DateTime<Utc>,
    data: State,
}

/// Session store writing one JSON document per session.
///
/// Decode policy: **fail-closed**. A file that does not parse is reported
/// as [`SessionError::Decode`] and left on disk for inspection; the
/// session cannot be started until it is removed.
///
/// Defaults to [`PersistencePolicy::Eager`].
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    policy: PersistencePolicy,
}

impl FileStore {
    /// Open a store under `root/name`, creating the directory if needed.
    ///
    /// ```no_run
    /// use satchel_session::FileStore;
    ///
    /// # async fn example() -> satchel_session::SessionResult<()> {
    /// let store = FileStore::new("/var/lib/myapp/sessions", "app").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(root: impl AsRef<Path>, name: &str) -> SessionResult<Self> {
        let dir = root.as_ref().join(name);
        fs::create_dir_all(&dir).await.map_err(|e| {
            SessionError::Connection(format!(
                "Failed to create session directory {:?}: {}",
                dir, e
            ))
        })?;

        debug!(fields: { "dir" => dir.display() }, "Initialized file session store");

        Ok(Self {
            dir,
            policy: PersistencePolicy::Eager,
        })
    }

    /// Use a different persistence policy.
    pub fn with_policy(mut self, policy: PersistencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Directory holding the session files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, session_id: &str) -> SessionResult<PathBuf> {
        if !is_valid_id(session_id) {
            return Err(SessionError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", session_id)))
    }

    /// Load an envelope, `None` if the file is missing.
    async fn load(&self, session_id: &str) -> SessionResult<Option<Envelope>> {
        let path = self.path(session_id)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&raw).map(Some).map_err(|e| {
            error!(fields: { "session_id" => session_id, "path" => path.display() }, "Session file is malformed: {}", e);
            SessionError::decode(session_id, e)
        })
    }

    /// Load an unexpired envelope; expired files are removed.
    async fn load_live(&self, session_id: &str) -> SessionResult<Option<Envelope>> {
        match self.load(session_id).await? {
            Some(envelope) if envelope.expires_at <= Utc::now() => {
                self.delete(session_id).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Write to a uniquely named temp file, then rename it over the
    /// session file. Readers never see a torn document, and concurrent
    /// writers for one identifier never share a temp file; the last
    /// rename wins.
    async fn store(&self, session_id: &str, envelope: &Envelope) -> SessionResult<()> {
        let path = self.path(session_id)?;
        let dir = self.dir.clone();
        let json = serde_json::to_vec(envelope)?;

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| SessionError::Io(std::io::Error::other(format!("Task join error: {}", e))))??;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    fn backend_name(&self) -> &'static str {
        "file"
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
        Ok(self.load_live(session_id).await?.is_some())
    }

    async fn read(&self, session_id: &str) -> SessionResult<Option<State>> {
        Ok(self.load_live(session_id).await?.map(|e| e.data))
    }

    async fn write(&self, session_id: &str, state: &State, lifetime: Duration) -> SessionResult<()> {
        let envelope = Envelope {
            expires_at: expires_at(lifetime),
            data: state.clone(),
        };
        self.store(session_id, &envelope).await
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        match fs::remove_file(self.path(session_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<()> {
        let from = self.path(old_id)?;
        let to = self.path(new_id)?;
        match fs::rename(&from, &to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn annotate_expiry(&self, session_id: &str, lifetime: Duration) -> SessionResult<()> {
        if let Some(mut envelope) = self.load_live(session_id).await? {
            envelope.expires_at = expires_at(lifetime);
            self.store(session_id, &envelope).await?;
        }
        Ok(())
    }

    async fn purge_expired(&self) -> SessionResult<usize> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut purged = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(session_id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };

            // Malformed files are left alone; they surface on read.
            if let Ok(Some(envelope)) = self.load(session_id).await
                && envelope.expires_at <= Utc::now()
            {
                self.delete(session_id).await?;
                purged += 1;
            }
        }

        Ok(purged)
    }
}
