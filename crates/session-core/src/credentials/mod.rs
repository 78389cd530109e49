//! Credential Store Adapter
//!
//! Loads and saves the per-session authentication material a transport
//! provider needs to resume a connection without pairing again. Every
//! session gets its own isolated namespace; nothing is shared between
//! sessions.
//!
//! Implementations must be safe to call concurrently for *different*
//! sessions. Calls for the same session are serialized by the session
//! manager, so stores do not lock per session internally.

mod file;
mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionId;

/// Result type for credential store operations
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Credential store errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed credential entry {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid credential key '{key}'")]
    InvalidKey { key: String },

    #[error("Credential backend unavailable: {message}")]
    Unavailable { message: String },
}

impl CredentialError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Opaque authentication material for one session
///
/// The material is a set of named JSON entries whose meaning belongs to the
/// transport provider (identity keys, pre-keys, sync state, ...). Updates
/// arrive as partial sets and are [merged](CredentialMaterial::merge) into
/// the current material; a `null` value deletes its key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialMaterial {
    entries: BTreeMap<String, serde_json::Value>,
}

impl CredentialMaterial {
    /// Fresh, empty material: the session has never been paired
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.entries.iter()
    }

    /// Apply a partial update. `null` values remove their key.
    pub fn merge(&mut self, update: CredentialMaterial) {
        for (key, value) in update.entries {
            if value.is_null() {
                self.entries.remove(&key);
            } else {
                self.entries.insert(key, value);
            }
        }
    }

    /// Builder-style insert, handy for providers and tests
    pub fn with_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.insert(key, value);
        self
    }
}

/// Per-session credential persistence
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Load the material for `session_id`, creating an empty namespace if
    /// none exists yet
    async fn load(&self, session_id: &SessionId) -> CredentialResult<CredentialMaterial>;

    /// Persist the complete material for `session_id`
    async fn persist(&self, session_id: &SessionId, material: &CredentialMaterial) -> CredentialResult<()>;

    /// Delete the session's namespace entirely
    async fn clear(&self, session_id: &SessionId) -> CredentialResult<()>;
}

/// Keys become file names, so they share the session id alphabet.
pub(crate) fn validate_key(key: &str) -> CredentialResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'));
    if valid {
        Ok(())
    } else {
        Err(CredentialError::InvalidKey { key: key.to_string() })
    }
}
