//! File-backed session state.
//!
//! The session is an explicit object handed to the REST client and the
//! dashboard runner, initialized once on startup and torn down on logout.
//! The token lives in a JSON file under the platform config directory so a
//! login survives process restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::warn;

const SESSION_FILE: &str = "session.json";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt session file: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionFile {
    token: String,
    #[serde(default)]
    username: Option<String>,
    saved_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Session {
    path: PathBuf,
    state: RwLock<Option<SessionFile>>,
}

impl Session {
    /// Default location: `<config dir>/agrowatch/session.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agrowatch")
            .join(SESSION_FILE)
    }

    /// Load a persisted session, or start unauthenticated when no file
    /// exists. A file that exists but does not parse is reported, not
    /// silently discarded.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|err| SessionError::Corrupt(err.to_string()))?,
            ),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Store a freshly issued token and persist it.
    pub fn store(&self, token: &str, username: Option<&str>) -> Result<(), SessionError> {
        let entry = SessionFile {
            token: token.to_string(),
            username: username.map(|name| name.to_string()),
            saved_at: Utc::now(),
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let raw = serde_json::to_string_pretty(&entry)
            .map_err(|err| SessionError::Corrupt(err.to_string()))?;
        fs::write(&self.path, raw)?;
        *self.state.write().expect("session lock poisoned") = Some(entry);
        Ok(())
    }

    /// Forget the token and remove the file. Part of logout teardown; the
    /// owner is responsible for also closing the push channel.
    pub fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(event = "session_clear_failed", error = %err);
                return Err(err.into());
            }
        }
        *self.state.write().expect("session lock poisoned") = None;
        Ok(())
    }

    pub fn token(&self) -> Option<String> {
        self.state
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|entry| entry.token.clone())
    }

    pub fn username(&self) -> Option<String> {
        self.state
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .and_then(|entry| entry.username.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
