//! In-process credential store
//!
//! Material lives only as long as the store; useful for tests and for
//! embedders that persist credentials elsewhere.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{validate_key, CredentialMaterial, CredentialResult, CredentialStore};
use crate::types::SessionId;

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    namespaces: DashMap<SessionId, CredentialMaterial>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a namespace exists for the session
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.namespaces.contains_key(session_id)
    }

    /// Copy of the stored material, without creating a namespace
    pub fn peek(&self, session_id: &SessionId) -> Option<CredentialMaterial> {
        self.namespaces.get(session_id).map(|m| m.value().clone())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, session_id: &SessionId) -> CredentialResult<CredentialMaterial> {
        Ok(self
            .namespaces
            .entry(session_id.clone())
            .or_default()
            .value()
            .clone())
    }

    async fn persist(&self, session_id: &SessionId, material: &CredentialMaterial) -> CredentialResult<()> {
        for (key, _) in material.iter() {
            validate_key(key)?;
        }
        self.namespaces.insert(session_id.clone(), material.clone());
        Ok(())
    }

    async fn clear(&self, session_id: &SessionId) -> CredentialResult<()> {
        self.namespaces.remove(session_id);
        Ok(())
    }
}
