//! Client-persisted session marker: the id of the last active token.
//!
//! Stored as a flat key/value map (the dashboard keeps it in a cookie) so a
//! reload can restore the active selection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Key under which the last active token id is stored.
pub const ACTIVE_TOKEN_KEY: &str = "activeTokenId";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait SessionStore: Send + Sync {
    fn load_active_token(&self) -> Option<String>;

    fn save_active_token(&self, token_id: &str) -> Result<(), SessionError>;

    fn clear_active_token(&self) -> Result<(), SessionError>;
}

/// Process-local marker; lost on exit.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active_token(token_id: &str) -> Self {
        let store = Self::new();
        store
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ACTIVE_TOKEN_KEY.to_string(), token_id.to_string());
        store
    }
}

impl SessionStore for MemorySessionStore {
    fn load_active_token(&self) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ACTIVE_TOKEN_KEY)
            .cloned()
    }

    fn save_active_token(&self, token_id: &str) -> Result<(), SessionError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ACTIVE_TOKEN_KEY.to_string(), token_id.to_string());
        Ok(())
    }

    fn clear_active_token(&self) -> Result<(), SessionError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(ACTIVE_TOKEN_KEY);
        Ok(())
    }
}

/// Marker persisted as a JSON object on disk.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<HashMap<String, String>, SessionError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, values: &HashMap<String, String>) -> Result<(), SessionError> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read()?;
        f(&mut values);
        self.write(&values)
    }
}

impl SessionStore for FileSessionStore {
    fn load_active_token(&self) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.read() {
            Ok(mut values) => values.remove(ACTIVE_TOKEN_KEY),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable session file");
                None
            }
        }
    }

    fn save_active_token(&self, token_id: &str) -> Result<(), SessionError> {
        self.update(|values| {
            values.insert(ACTIVE_TOKEN_KEY.to_string(), token_id.to_string());
        })
    }

    fn clear_active_token(&self) -> Result<(), SessionError> {
        self.update(|values| {
            values.remove(ACTIVE_TOKEN_KEY);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySessionStore::new();
        assert!(store.load_active_token().is_none());
        store.save_active_token("tok1").unwrap();
        assert_eq!(store.load_active_token().as_deref(), Some("tok1"));
        store.clear_active_token().unwrap();
        assert!(store.load_active_token().is_none());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        FileSessionStore::new(&path).save_active_token("tok1").unwrap();
        let reopened = FileSessionStore::new(&path);
        assert_eq!(reopened.load_active_token().as_deref(), Some("tok1"));

        reopened.clear_active_token().unwrap();
        assert!(FileSessionStore::new(&path).load_active_token().is_none());
    }

    #[test]
    fn test_file_store_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"lastSignIn": "yesterday"}"#).unwrap();

        FileSessionStore::new(&path).save_active_token("tok1").unwrap();
        let raw: HashMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["lastSignIn"], "yesterday");
        assert_eq!(raw[ACTIVE_TOKEN_KEY], "tok1");
    }

    #[test]
    fn test_missing_or_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FileSessionStore::new(dir.path().join("nope.json"));
        assert!(missing.load_active_token().is_none());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(FileSessionStore::new(&path).load_active_token().is_none());
    }
}
