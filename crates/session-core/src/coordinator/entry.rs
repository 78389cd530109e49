//! Per-session state held in the session table

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::credentials::CredentialMaterial;
use crate::transport::TransportHandle;
use crate::types::{DisconnectReason, Identity, SessionId, SessionSnapshot, SessionState, SessionStatusChanged};

/// Mutable part of a session, behind the entry's data lock
pub(crate) struct SessionInner {
    pub state: SessionState,
    pub pairing_challenge: Option<String>,
    pub identity: Option<Identity>,
    pub last_error: Option<String>,
    pub disconnect_reason: Option<DisconnectReason>,
    pub updated_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Current credential material, merged from provider updates
    pub credentials: CredentialMaterial,
    /// Live connection, present only while the state is live
    pub handle: Option<Arc<dyn TransportHandle>>,
    /// Connection attempt this state belongs to
    pub generation: u64,
    pub reconnect_attempts: u32,
}

/// One row of the session table
///
/// Two locks guard an entry. `op_lock` linearizes lifecycle operations and
/// is held across their I/O; `inner` is a short data lock that is never held
/// across an await. Take `op_lock` first.
pub(crate) struct SessionEntry {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub op_lock: tokio::sync::Mutex<()>,
    pub inner: RwLock<SessionInner>,
    removed: AtomicBool,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionEntry {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            op_lock: tokio::sync::Mutex::new(()),
            inner: RwLock::new(SessionInner {
                state: SessionState::NotStarted,
                pairing_challenge: None,
                identity: None,
                last_error: None,
                disconnect_reason: None,
                updated_at: now,
                connected_at: None,
                credentials: CredentialMaterial::new(),
                handle: None,
                generation: 0,
                reconnect_attempts: 0,
            }),
            removed: AtomicBool::new(false),
            event_loop: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.read();
        SessionSnapshot {
            session_id: self.id.clone(),
            state: inner.state,
            pairing_challenge: inner.pairing_challenge.clone(),
            identity: inner.identity.clone(),
            last_error: inner.last_error.clone(),
            disconnect_reason: inner.disconnect_reason.clone(),
            reconnect_attempts: inner.reconnect_attempts,
            created_at: self.created_at,
            updated_at: inner.updated_at,
            connected_at: inner.connected_at,
        }
    }

    /// Move to `next` and apply `mutate`, if the state machine allows it.
    ///
    /// The pairing challenge is cleared on every transition that does not
    /// land in `AwaitingPairing`. Returns the change notification and the
    /// resulting snapshot, or `None` when the transition was refused or is
    /// a no-op.
    pub fn apply_transition<F>(
        &self,
        next: SessionState,
        reason: Option<String>,
        mutate: F,
    ) -> Option<(SessionStatusChanged, SessionSnapshot)>
    where
        F: FnOnce(&mut SessionInner),
    {
        let now = Utc::now();
        let old_state = {
            let mut inner = self.inner.write();
            let old_state = inner.state;
            if old_state == next && next != SessionState::AwaitingPairing {
                return None;
            }
            if !old_state.can_transition_to(next) {
                warn!(
                    session_id = %self.id,
                    from = %old_state,
                    to = %next,
                    "Refusing invalid state transition"
                );
                return None;
            }
            inner.state = next;
            inner.updated_at = now;
            if next != SessionState::AwaitingPairing {
                inner.pairing_challenge = None;
            }
            mutate(&mut *inner);
            old_state
        };

        let change = SessionStatusChanged {
            session_id: self.id.clone(),
            old_state,
            new_state: next,
            timestamp: now,
            reason,
        };
        Some((change, self.snapshot()))
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub fn take_handle(&self) -> Option<Arc<dyn TransportHandle>> {
        self.inner.write().handle.take()
    }

    pub fn set_event_loop(&self, task: JoinHandle<()>) {
        if let Some(previous) = self.event_loop.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn abort_event_loop(&self) {
        if let Some(task) = self.event_loop.lock().take() {
            task.abort();
        }
    }

    pub fn set_reconnect_timer(&self, task: JoinHandle<()>) {
        if let Some(previous) = self.reconnect_timer.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn abort_reconnect_timer(&self) -> bool {
        match self.reconnect_timer.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Detach the pending timer without aborting it. Used by the timer task
    /// itself before it restarts the session.
    pub fn take_reconnect_timer(&self) -> Option<JoinHandle<()>> {
        self.reconnect_timer.lock().take()
    }

    pub fn has_reconnect_timer(&self) -> bool {
        self.reconnect_timer.lock().is_some()
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("removed", &self.is_removed())
            .finish()
    }
}
