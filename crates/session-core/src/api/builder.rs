//! Builder for [`SessionManager`]

use std::sync::Arc;

use crate::config::SessionManagerConfig;
use crate::coordinator::SessionManager;
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::errors::{Result, SessionError};
use crate::store::{MemoryRecordStore, RecordStore};
use crate::transport::TransportProvider;

/// Assembles a [`SessionManager`] from its collaborators
///
/// The transport provider is required. Credentials default to a
/// [`FileCredentialStore`] under `config.credentials_dir`; records default
/// to an in-memory store.
#[derive(Default)]
pub struct SessionManagerBuilder {
    config: SessionManagerConfig,
    transport: Option<Arc<dyn TransportProvider>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    records: Option<Arc<dyn RecordStore>>,
}

impl SessionManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: SessionManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn TransportProvider>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn with_record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.records = Some(store);
        self
    }

    pub fn build(self) -> Result<Arc<SessionManager>> {
        let transport = self
            .transport
            .ok_or_else(|| SessionError::config("a transport provider is required"))?;
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(FileCredentialStore::new(self.config.credentials_dir.clone())));
        let records = self.records.unwrap_or_else(|| Arc::new(MemoryRecordStore::new()));

        SessionManager::new(self.config, credentials, transport, records)
    }
}
