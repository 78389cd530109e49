//! Lifecycle operations: start, reconnect, teardown, send and shutdown

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tenantlink_infra_common::LogContext;
use tracing::{debug, error, info, warn, Instrument, Level};

use super::entry::SessionEntry;
use super::SessionManager;
use crate::credentials::CredentialMaterial;
use crate::errors::{Result, SessionError};
use crate::store::MessageRecord;
use crate::transport::EventBinding;
use crate::types::{SessionId, SessionState, StartOutcome};

/// Who asked for a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartTrigger {
    Caller,
    Reconnect,
}

impl SessionManager {
    /// Start a session, or do nothing if it already has a live connection
    ///
    /// On failure the session is left in `Error` and the cause is returned;
    /// no retry is scheduled.
    pub async fn start(self: &Arc<Self>, session_id: &SessionId) -> Result<StartOutcome> {
        loop {
            let entry = self.table.get_or_insert(session_id);
            let _guard = entry.op_lock.lock().await;
            if entry.is_removed() {
                // a teardown finished while we waited; retry on a fresh entry
                continue;
            }
            return self.start_locked(&entry, StartTrigger::Caller).await;
        }
    }

    /// Open a connection for `entry`. Callers hold its `op_lock`.
    pub(crate) async fn start_locked(
        self: &Arc<Self>,
        entry: &Arc<SessionEntry>,
        trigger: StartTrigger,
    ) -> Result<StartOutcome> {
        let session_id = entry.id.clone();
        let state = entry.state();
        if state.is_live() {
            debug!(session_id = %session_id, state = %state, "Session already live, start is a no-op");
            return Ok(StartOutcome::AlreadyActive);
        }

        if trigger == StartTrigger::Caller && entry.abort_reconnect_timer() {
            debug!(session_id = %session_id, "Cancelled pending reconnection");
        }

        let generation = self.next_generation();
        let reason = match trigger {
            StartTrigger::Caller => "start requested",
            StartTrigger::Reconnect => "reconnecting",
        };
        self.transition(entry, SessionState::Starting, Some(reason.to_string()), |inner| {
            inner.generation = generation;
            inner.last_error = None;
            inner.disconnect_reason = None;
            if trigger == StartTrigger::Caller {
                inner.reconnect_attempts = 0;
            }
        })
        .await;

        let credentials = match self.credentials.load(&session_id).await {
            Ok(material) => material,
            Err(e) => {
                let err = SessionError::from(e);
                self.fail_start(entry, &err).await;
                return Err(err);
            }
        };
        entry.inner.write().credentials = credentials.clone();

        let connection = match self.transport.connect(&session_id, credentials).await {
            Ok(connection) => connection,
            Err(e) => {
                let err = SessionError::from(e);
                self.fail_start(entry, &err).await;
                return Err(err);
            }
        };

        if entry.is_removed() {
            connection.handle.close().await;
            return Err(SessionError::TornDown {
                session_id: session_id.to_string(),
            });
        }

        entry.inner.write().handle = Some(connection.handle);

        let span = LogContext::with_operation("session-manager", "event_loop")
            .with_field("session_id", session_id.as_str())
            .with_field("generation", generation.to_string())
            .span(Level::INFO);
        let task = tokio::spawn(
            Arc::clone(self)
                .run_event_loop(Arc::clone(entry), generation, EventBinding::new(connection.events))
                .instrument(span),
        );
        entry.set_event_loop(task);

        info!(session_id = %session_id, generation, trigger = ?trigger, "Session connection opened");
        Ok(StartOutcome::Started)
    }

    async fn fail_start(&self, entry: &SessionEntry, err: &SessionError) {
        error!(session_id = %entry.id, error = %err, "Session failed to start");
        let message = err.to_string();
        self.transition(entry, SessionState::Error, Some(message.clone()), |inner| {
            inner.last_error = Some(message);
        })
        .await;
    }

    /// Arm a reconnection timer for the connection attempt `generation`.
    /// Callers hold the entry's `op_lock`.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>, entry: &Arc<SessionEntry>, generation: u64) {
        let attempt = entry.inner.read().reconnect_attempts.saturating_add(1);
        let Some(delay) = self.reconnect.delay_for(attempt) else {
            warn!(
                session_id = %entry.id,
                attempts = attempt - 1,
                limit = ?self.reconnect.max_attempts(),
                "Reconnection attempts exhausted, no further retries"
            );
            return;
        };
        entry.inner.write().reconnect_attempts = attempt;

        info!(
            session_id = %entry.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection"
        );

        let manager = Arc::clone(self);
        let timer_entry = Arc::clone(entry);
        let span = LogContext::with_operation("session-manager", "reconnect")
            .with_field("session_id", entry.id.as_str())
            .span(Level::INFO);
        let task = tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                manager.reconnect(timer_entry, generation).await;
            }
            .instrument(span),
        );
        entry.set_reconnect_timer(task);
    }

    /// Body of a fired reconnection timer
    async fn reconnect(self: Arc<Self>, entry: Arc<SessionEntry>, generation: u64) {
        let _guard = entry.op_lock.lock().await;

        if entry.is_removed() || !self.table.is_current(&entry) {
            debug!(session_id = %entry.id, "Session torn down, dropping reconnection");
            return;
        }
        if entry.generation() != generation || entry.state().is_live() {
            debug!(session_id = %entry.id, "Session restarted meanwhile, dropping reconnection");
            return;
        }

        // detach so the restart below does not cancel this task
        entry.take_reconnect_timer();

        match self.start_locked(&entry, StartTrigger::Reconnect).await {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!(session_id = %entry.id, error = %e, "Reconnection attempt failed, retrying");
                // start_locked moved the entry to a new generation
                self.schedule_reconnect(&entry, entry.generation());
            }
            Err(e) => warn!(session_id = %entry.id, error = %e, "Reconnection attempt failed"),
        }
    }

    /// Tear a session down: close its connection, cancel its timer, drop it
    /// from the table, delete its durable record and its credentials.
    ///
    /// Local teardown always completes. The first durable deletion failure,
    /// if any, is returned afterwards.
    pub async fn teardown(&self, session_id: &SessionId) -> Result<()> {
        let entry = self.table.get_or_insert(session_id);
        entry.mark_removed();
        entry.abort_event_loop();

        let _guard = entry.op_lock.lock().await;
        // a start holding the lock may have spawned a new loop
        entry.abort_event_loop();
        entry.abort_reconnect_timer();

        if let Some(handle) = entry.take_handle() {
            handle.close().await;
        }

        if let Some((change, _)) =
            entry.apply_transition(SessionState::NotStarted, Some("teardown".to_string()), |inner| {
                inner.credentials = CredentialMaterial::new();
                inner.identity = None;
                inner.connected_at = None;
                inner.reconnect_attempts = 0;
            })
        {
            self.announce(change);
        }

        let record_result = self.publisher.remove(session_id).await;
        let credential_result = self.credentials.clear(session_id).await;
        self.table.remove_entry(&entry);

        match record_result {
            Ok(existed) => debug!(session_id = %session_id, existed, "Deleted session record"),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to delete session record");
                return Err(e.into());
            }
        }
        if let Err(e) = credential_result {
            warn!(session_id = %session_id, error = %e, "Failed to clear credentials");
            return Err(e.into());
        }

        info!(session_id = %session_id, "Session torn down");
        Ok(())
    }

    /// Send a text message through a connected session
    pub async fn send_message(&self, session_id: &SessionId, recipient: &str, body: &str) -> Result<()> {
        if recipient.trim().is_empty() {
            return Err(SessionError::invalid_request("recipient is required"));
        }
        if body.is_empty() {
            return Err(SessionError::invalid_request("message body is required"));
        }

        let handle = self
            .table
            .get(session_id)
            .and_then(|entry| {
                let inner = entry.inner.read();
                match inner.state {
                    SessionState::Connected => inner.handle.clone(),
                    _ => None,
                }
            })
            .ok_or_else(|| SessionError::not_connected(session_id.as_str()))?;

        handle.send_text(recipient, body).await?;
        debug!(session_id = %session_id, recipient, "Message sent");

        if self.config.persist_outbound_messages {
            self.publisher
                .record_message(&MessageRecord {
                    session_id: session_id.clone(),
                    number: recipient.to_string(),
                    message: body.to_string(),
                    from_self: true,
                    created_at: Utc::now(),
                })
                .await;
        }
        Ok(())
    }

    /// Close every connection and cancel every task. Durable records and
    /// credentials are kept, so sessions resume on the next start.
    pub async fn shutdown(&self) {
        let entries = self.table.drain();
        info!(sessions = entries.len(), "Shutting down session manager");

        let closes = entries.iter().map(|entry| async move {
            entry.mark_removed();
            entry.abort_event_loop();
            entry.abort_reconnect_timer();
            if let Some(handle) = entry.take_handle() {
                handle.close().await;
            }
        });
        join_all(closes).await;
    }
}
