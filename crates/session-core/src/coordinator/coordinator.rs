//! Core SessionManager structure and read accessors

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use super::entry::{SessionEntry, SessionInner};
use super::registry::SessionTable;
use crate::config::SessionManagerConfig;
use crate::credentials::CredentialStore;
use crate::errors::Result;
use crate::pairing::{ChallengeRenderer, PairingChallenge};
use crate::publisher::StatusPublisher;
use crate::reconnect::ReconnectPolicy;
use crate::store::RecordStore;
use crate::transport::TransportProvider;
use crate::types::{
    Identity, SessionId, SessionSnapshot, SessionState, SessionStats, SessionStatus, SessionStatusChanged, StatusSource,
};

/// Owns the session table and drives every session's lifecycle
///
/// Operations on one session id are linearized; different ids proceed
/// independently. Each live connection has its own event loop task that
/// applies transport events to the session in emission order.
pub struct SessionManager {
    pub(crate) config: SessionManagerConfig,
    pub(crate) table: SessionTable,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) transport: Arc<dyn TransportProvider>,
    pub(crate) publisher: StatusPublisher,
    pub(crate) renderer: ChallengeRenderer,
    pub(crate) reconnect: ReconnectPolicy,
    status_tx: broadcast::Sender<SessionStatusChanged>,
    generation: AtomicU64,
}

impl SessionManager {
    pub(crate) fn new(
        config: SessionManagerConfig,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn TransportProvider>,
        records: Arc<dyn RecordStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let renderer = ChallengeRenderer::new(&config.pairing)?;
        let reconnect = ReconnectPolicy::new(&config.reconnect);
        let (status_tx, _) = broadcast::channel(config.event_channel_capacity);

        info!(
            credentials_dir = %config.credentials_dir.display(),
            reconnect_delay_ms = config.reconnect.initial_delay_ms,
            "Session manager created"
        );

        Ok(Arc::new(Self {
            config,
            table: SessionTable::new(),
            credentials,
            transport,
            publisher: StatusPublisher::new(records),
            renderer,
            reconnect,
            status_tx,
            generation: AtomicU64::new(0),
        }))
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    /// Receive every state change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatusChanged> {
        self.status_tx.subscribe()
    }

    /// Point-in-time copy of a session in the table
    pub fn snapshot(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        self.table.get(session_id).map(|e| e.snapshot())
    }

    /// Whether the session owns a live connection in this process
    pub fn is_live(&self, session_id: &SessionId) -> bool {
        self.table
            .get(session_id)
            .map(|e| e.state().is_live())
            .unwrap_or(false)
    }

    /// Status from the session table, then the record store, then `not_started`
    pub async fn status(&self, session_id: &SessionId) -> SessionStatus {
        if let Some(entry) = self.table.get(session_id) {
            let snapshot = entry.snapshot();
            if snapshot.state != SessionState::NotStarted {
                return SessionStatus::from(&snapshot);
            }
        }

        match self.publisher.lookup(session_id).await {
            Some(record) => SessionStatus {
                session_id: session_id.clone(),
                state: record.status,
                identity: record.phone.map(|phone| Identity::new(phone, record.name)),
                source: StatusSource::Persisted,
                updated_at: Some(record.updated_at),
            },
            None => SessionStatus::not_started(session_id.clone()),
        }
    }

    /// Current pairing challenge of a live session, rendered for display
    pub fn pairing_challenge(&self, session_id: &SessionId) -> Option<PairingChallenge> {
        let entry = self.table.get(session_id)?;
        let inner = entry.inner.read();
        match (inner.state, inner.pairing_challenge.as_deref()) {
            (SessionState::AwaitingPairing, Some(token)) => Some(self.renderer.render(token)),
            _ => None,
        }
    }

    /// Whether a reconnection timer is armed for the session
    pub fn has_pending_reconnect(&self, session_id: &SessionId) -> bool {
        self.table
            .get(session_id)
            .map(|e| e.has_reconnect_timer())
            .unwrap_or(false)
    }

    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.table.snapshots()
    }

    pub fn stats(&self) -> SessionStats {
        self.table.stats()
    }

    /// Record store failures since startup
    pub fn publish_failures(&self) -> u64 {
        self.publisher.failure_count()
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn announce(&self, change: SessionStatusChanged) {
        info!(
            session_id = %change.session_id,
            from = %change.old_state,
            to = %change.new_state,
            reason = change.reason.as_deref().unwrap_or(""),
            "Session state changed"
        );
        // no subscribers is fine
        let _ = self.status_tx.send(change);
    }

    /// Apply a transition, announce it and publish the new record.
    /// Callers hold the entry's `op_lock`.
    pub(crate) async fn transition<F>(
        &self,
        entry: &SessionEntry,
        next: SessionState,
        reason: Option<String>,
        mutate: F,
    ) -> bool
    where
        F: FnOnce(&mut SessionInner),
    {
        let Some((change, snapshot)) = entry.apply_transition(next, reason, mutate) else {
            return false;
        };
        self.announce(change);
        self.publisher.publish(&snapshot).await;
        true
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.table.len())
            .field("publisher", &self.publisher)
            .finish()
    }
}
