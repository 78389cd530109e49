//! Directory-per-session credential store
//!
//! Layout: `<root>/<session_id>/<key>.json`, one file per material entry.
//! Entries are written to a temporary file and renamed into place so a crash
//! mid-write never leaves a truncated entry behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{validate_key, CredentialError, CredentialMaterial, CredentialResult, CredentialStore};
use crate::types::SessionId;

const ENTRY_EXT: &str = "json";
const TMP_EXT: &str = "json.tmp";

/// Credential store backed by one directory per session
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Namespace directory of a session
    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    async fn ensure_dir(&self, dir: &Path) -> CredentialResult<()> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| CredentialError::io(dir, e))
    }

    async fn write_entry(dir: &Path, key: &str, value: &serde_json::Value) -> CredentialResult<()> {
        let path = dir.join(format!("{}.{}", key, ENTRY_EXT));
        let tmp = dir.join(format!("{}.{}", key, TMP_EXT));
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| CredentialError::Malformed {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| CredentialError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| CredentialError::io(&path, e))
    }

    /// Key of a stored entry, or `None` for files that are not entries
    fn entry_key(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let key = name.strip_suffix(".json")?;
        if key.is_empty() || validate_key(key).is_err() {
            return None;
        }
        Some(key.to_string())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, session_id: &SessionId) -> CredentialResult<CredentialMaterial> {
        let dir = self.session_dir(session_id);
        self.ensure_dir(&dir).await?;

        let mut material = CredentialMaterial::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| CredentialError::io(&dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CredentialError::io(&dir, e))?
        {
            let path = entry.path();
            let Some(key) = Self::entry_key(&path) else {
                continue;
            };
            let bytes = fs::read(&path)
                .await
                .map_err(|e| CredentialError::io(&path, e))?;
            let value = serde_json::from_slice(&bytes)
                .map_err(|source| CredentialError::Malformed { path: path.clone(), source })?;
            material.insert(key, value);
        }

        debug!(session_id = %session_id, entries = material.len(), "Loaded credential material");
        Ok(material)
    }

    async fn persist(&self, session_id: &SessionId, material: &CredentialMaterial) -> CredentialResult<()> {
        for (key, _) in material.iter() {
            validate_key(key)?;
        }

        let dir = self.session_dir(session_id);
        self.ensure_dir(&dir).await?;

        for (key, value) in material.iter() {
            Self::write_entry(&dir, key, value).await?;
        }

        // drop entries the material no longer carries
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| CredentialError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CredentialError::io(&dir, e))?
        {
            let path = entry.path();
            if let Some(key) = Self::entry_key(&path) {
                if material.get(&key).is_none() {
                    fs::remove_file(&path)
                        .await
                        .map_err(|e| CredentialError::io(&path, e))?;
                }
            }
        }

        debug!(session_id = %session_id, entries = material.len(), "Persisted credential material");
        Ok(())
    }

    async fn clear(&self, session_id: &SessionId) -> CredentialResult<()> {
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(session_id = %session_id, "Cleared credential namespace");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CredentialError::io(&dir, e)),
        }
    }
}
