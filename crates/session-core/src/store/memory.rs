use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{MessageRecord, RecordStore, SessionRecord, StoreResult};
use crate::types::SessionId;

/// Record store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    sessions: DashMap<SessionId, SessionRecord>,
    messages: RwLock<Vec<MessageRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_session(&self, record: &SessionRecord) -> StoreResult<()> {
        self.sessions.insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<SessionRecord>> {
        Ok(self.sessions.get(session_id).map(|r| r.value().clone()))
    }

    async fn delete_session(&self, session_id: &SessionId) -> StoreResult<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn insert_message(&self, record: &MessageRecord) -> StoreResult<()> {
        self.messages.write().await.push(record.clone());
        Ok(())
    }

    async fn messages_for(&self, session_id: &SessionId) -> StoreResult<Vec<MessageRecord>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| &m.session_id == session_id)
            .cloned()
            .collect())
    }
}
