//! Local session cache.
//!
//! One record per machine holding the credentials of the last successful
//! online validation and when it happened. It is what the offline grace
//! period is measured against. Reads and writes are best-effort: a missing
//! or unreadable file is a cache miss, and a failed write never fails the
//! validation that triggered it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Application directory under the per-user data directory.
pub const APP_DIR: &str = "MoneyTracker";

/// Session file name.
pub const SESSION_FILE: &str = "auth_session.json";

/// The cached record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub login: String,
    pub password: String,
    pub key: String,
    /// Local time of the last successful online validation.
    #[serde(default)]
    pub last_login: Option<NaiveDateTime>,
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("key", &self.key)
            .field("last_login", &self.last_login)
            .finish()
    }
}

/// File-backed session cache.
#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    /// Cache stored at an explicit path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache at the per-user application data path.
    #[must_use]
    pub fn default_location() -> Self {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::at(base.join(APP_DIR).join(SESSION_FILE))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached record, or `None` if absent or unreadable.
    #[must_use]
    pub fn load(&self) -> Option<SessionRecord> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read session cache {:?}: {}", self.path, e);
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring corrupt session cache {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Overwrites the record with `last_login = now`. Failures are logged.
    pub fn save(&self, login: &str, password: &str, key: &str, now: NaiveDateTime) {
        let record = SessionRecord {
            login: login.to_string(),
            password: password.to_string(),
            key: key.to_string(),
            last_login: Some(now),
        };

        match self.write(&record) {
            Ok(()) => debug!("Session cached at {:?}", self.path),
            Err(e) => warn!("Failed to write session cache {:?}: {}", self.path, e),
        }
    }

    /// Removes the record. A missing file is not an error.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Session cache cleared"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove session cache {:?}: {}", self.path, e),
        }
    }

    fn write(&self, record: &SessionRecord) -> io::Result<()> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        // Unique temp file per writer, renamed over the record.
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, record).map_err(io::Error::other)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
