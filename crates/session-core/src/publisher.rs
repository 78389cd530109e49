//! Status/Record Publisher
//!
//! Pushes session state to the durable [`RecordStore`] and keeps the last
//! record of every session in an in-process cache. Store failures are logged
//! and counted; they never block or roll back a transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::store::{MessageRecord, RecordStore, SessionRecord, StoreResult};
use crate::types::{SessionId, SessionSnapshot, SessionState};

pub struct StatusPublisher {
    store: Arc<dyn RecordStore>,
    cache: DashMap<SessionId, SessionRecord>,
    failures: AtomicU64,
}

impl StatusPublisher {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            failures: AtomicU64::new(0),
        }
    }

    /// Durable record for a snapshot
    pub fn record_for(snapshot: &SessionSnapshot) -> SessionRecord {
        let identity = snapshot.identity.as_ref();
        SessionRecord {
            session_id: snapshot.session_id.clone(),
            status: snapshot.state,
            phone: identity.map(|i| i.account_id.clone()),
            name: identity.and_then(|i| i.display_name.clone()),
            qr_code: match snapshot.state {
                SessionState::AwaitingPairing => snapshot.pairing_challenge.clone(),
                _ => None,
            },
            is_connected: snapshot.state == SessionState::Connected,
            connected_at: snapshot.connected_at,
            updated_at: snapshot.updated_at,
        }
    }

    /// Upsert the session's record. Returns whether the store accepted it;
    /// the cache is updated either way.
    pub async fn publish(&self, snapshot: &SessionSnapshot) -> bool {
        let record = Self::record_for(snapshot);
        self.cache.insert(record.session_id.clone(), record.clone());

        match self.store.upsert_session(&record).await {
            Ok(()) => {
                debug!(session_id = %record.session_id, status = %record.status, "Published session status");
                true
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %record.session_id,
                    status = %record.status,
                    error = %e,
                    "Failed to publish session status, in-memory state stays authoritative"
                );
                false
            }
        }
    }

    /// Delete the durable record and forget the cached one
    pub async fn remove(&self, session_id: &SessionId) -> StoreResult<bool> {
        self.cache.remove(session_id);
        self.store.delete_session(session_id).await
    }

    /// Last known record: the store first, the cache when the store fails
    pub async fn lookup(&self, session_id: &SessionId) -> Option<SessionRecord> {
        match self.store.get_session(session_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Record store lookup failed, using cache");
                self.cached(session_id)
            }
        }
    }

    pub fn cached(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.cache.get(session_id).map(|r| r.value().clone())
    }

    /// Persist a message log entry. Failures are logged only.
    pub async fn record_message(&self, record: &MessageRecord) -> bool {
        match self.store.insert_message(record).await {
            Ok(()) => true,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %record.session_id,
                    from_self = record.from_self,
                    error = %e,
                    "Failed to persist message"
                );
                false
            }
        }
    }

    /// Store writes that failed since startup
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("cached", &self.cache.len())
            .field("failures", &self.failure_count())
            .finish()
    }
}
