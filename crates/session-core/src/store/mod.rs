//! Durable record store
//!
//! The external persistence service that keeps one status row per session
//! and the message log across process restarts. [`RecordStore`] is the seam;
//! [`MemoryRecordStore`] is always available and `SqliteRecordStore` is
//! compiled with the `persistence` feature.

mod memory;
#[cfg(feature = "persistence")]
mod sqlite;

pub use memory::MemoryRecordStore;
#[cfg(feature = "persistence")]
pub use sqlite::SqliteRecordStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{SessionId, SessionState};

/// Result type for record store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Corrupt record for {session_id}: {message}")]
    Corrupt { session_id: String, message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

/// Persisted status row, one per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub status: SessionState,
    /// Linked account id
    pub phone: Option<String>,
    /// Linked account display name
    pub name: Option<String>,
    /// Current pairing token, only while awaiting pairing
    pub qr_code: Option<String>,
    pub is_connected: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted message log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub session_id: SessionId,
    /// Remote party: sender for inbound, recipient for outbound
    pub number: String,
    pub message: String,
    pub from_self: bool,
    pub created_at: DateTime<Utc>,
}

/// Durable store collaborator
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Insert or replace the row keyed by `record.session_id`
    async fn upsert_session(&self, record: &SessionRecord) -> StoreResult<()>;

    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<SessionRecord>>;

    /// Delete the session row. Returns whether a row existed.
    async fn delete_session(&self, session_id: &SessionId) -> StoreResult<bool>;

    async fn insert_message(&self, record: &MessageRecord) -> StoreResult<()>;

    /// Messages of a session, oldest first
    async fn messages_for(&self, session_id: &SessionId) -> StoreResult<Vec<MessageRecord>>;
}
