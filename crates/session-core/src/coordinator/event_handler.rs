//! Per-session event loop
//!
//! One task per live connection. Events are applied in the order the
//! provider emitted them, each under the entry's `op_lock`. A failing or
//! panicking handler is logged and the loop keeps running.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::entry::SessionEntry;
use super::SessionManager;
use crate::credentials::CredentialMaterial;
use crate::store::MessageRecord;
use crate::transport::{BindingEvent, EventBinding, RawConnectionState};
use crate::types::{DisconnectReason, Identity, SessionState};

/// What the loop does after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Stop,
}

impl SessionManager {
    pub(crate) async fn run_event_loop(
        self: Arc<Self>,
        entry: Arc<SessionEntry>,
        generation: u64,
        mut binding: EventBinding,
    ) {
        debug!(session_id = %entry.id, generation, "Session event loop started");

        while let Some(event) = binding.next_event().await {
            let outcome = AssertUnwindSafe(self.handle_event(&entry, generation, event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(LoopControl::Continue) => {}
                Ok(LoopControl::Stop) => {
                    debug!(session_id = %entry.id, generation, "Session event loop finished");
                    return;
                }
                Err(_) => {
                    error!(session_id = %entry.id, generation, "Session event handler panicked, event dropped");
                }
            }
        }

        // the provider dropped its event stream without a close signal
        let _guard = entry.op_lock.lock().await;
        if self.is_current(&entry, generation) && entry.state().is_live() {
            warn!(session_id = %entry.id, generation, "Transport event stream ended unexpectedly");
            self.on_close(&entry, generation, DisconnectReason::ConnectionLost).await;
        }
    }

    fn is_current(&self, entry: &SessionEntry, generation: u64) -> bool {
        !entry.is_removed() && entry.generation() == generation
    }

    async fn handle_event(self: &Arc<Self>, entry: &Arc<SessionEntry>, generation: u64, event: BindingEvent) -> LoopControl {
        if let BindingEvent::MessageReceived {
            sender_id,
            body_text,
            from_self,
            timestamp,
        } = event
        {
            // recorded without the op_lock, so check the generation here
            if !self.is_current(entry, generation) {
                debug!(session_id = %entry.id, generation, "Dropping message from a superseded connection");
                return LoopControl::Stop;
            }
            self.on_message(entry, sender_id, body_text, from_self, timestamp).await;
            return LoopControl::Continue;
        }

        let _guard = entry.op_lock.lock().await;
        if !self.is_current(entry, generation) {
            debug!(session_id = %entry.id, generation, "Ignoring event from a superseded connection");
            return LoopControl::Stop;
        }

        match event {
            BindingEvent::CredentialsChanged(update) => {
                self.on_credentials(entry, update).await;
                LoopControl::Continue
            }
            BindingEvent::ConnectionStateChanged {
                raw_state,
                pairing_challenge,
                disconnect_reason,
                identity,
            } => match raw_state {
                Some(RawConnectionState::Open) => {
                    self.on_open(entry, identity).await;
                    LoopControl::Continue
                }
                Some(RawConnectionState::Close) => {
                    let reason = disconnect_reason.unwrap_or(DisconnectReason::ConnectionClosed);
                    self.on_close(entry, generation, reason).await;
                    LoopControl::Stop
                }
                Some(RawConnectionState::Connecting) | None => {
                    if let Some(token) = pairing_challenge {
                        self.on_challenge(entry, token).await;
                    }
                    LoopControl::Continue
                }
            },
            BindingEvent::MessageReceived { .. } => LoopControl::Continue,
        }
    }

    async fn on_credentials(&self, entry: &SessionEntry, update: CredentialMaterial) {
        let material = {
            let mut inner = entry.inner.write();
            inner.credentials.merge(update);
            inner.credentials.clone()
        };
        if let Err(e) = self.credentials.persist(&entry.id, &material).await {
            // retried with the next update
            warn!(session_id = %entry.id, error = %e, "Failed to persist credential update");
        }
    }

    async fn on_challenge(&self, entry: &SessionEntry, token: String) {
        match entry.state() {
            SessionState::Starting | SessionState::AwaitingPairing => {}
            state => {
                debug!(session_id = %entry.id, state = %state, "Ignoring stale pairing challenge");
                return;
            }
        }
        self.transition(entry, SessionState::AwaitingPairing, Some("pairing challenge".to_string()), |inner| {
            inner.pairing_challenge = Some(token);
        })
        .await;
    }

    async fn on_open(&self, entry: &SessionEntry, identity: Option<Identity>) {
        let now = Utc::now();
        let identity = identity.or_else(|| {
            entry
                .inner
                .read()
                .handle
                .as_ref()
                .and_then(|h| h.account_identity())
        });

        let Some((change, _)) = entry.apply_transition(SessionState::Connected, Some("open".to_string()), |inner| {
            if identity.is_some() {
                inner.identity = identity;
            }
            inner.connected_at = Some(now);
            inner.reconnect_attempts = 0;
        }) else {
            return;
        };
        self.announce(change);

        let material = entry.inner.read().credentials.clone();
        if let Err(e) = self.credentials.persist(&entry.id, &material).await {
            warn!(session_id = %entry.id, error = %e, "Failed to persist credentials on connect");
        }

        let snapshot = entry.snapshot();
        self.publisher.publish(&snapshot).await;
        info!(
            session_id = %entry.id,
            account = snapshot.identity.as_ref().map(|i| i.account_id.as_str()).unwrap_or("unknown"),
            "Session connected"
        );
    }

    pub(crate) async fn on_close(self: &Arc<Self>, entry: &Arc<SessionEntry>, generation: u64, reason: DisconnectReason) {
        if let Some(handle) = entry.take_handle() {
            handle.close().await;
        }

        let logged_out = reason.is_logged_out();
        let label = reason.to_string();
        self.transition(entry, SessionState::Disconnected, Some(label), |inner| {
            inner.disconnect_reason = Some(reason);
            if logged_out {
                inner.credentials = CredentialMaterial::new();
                inner.identity = None;
            }
        })
        .await;

        if logged_out {
            info!(session_id = %entry.id, "Session logged out, pairing required");
            if let Err(e) = self.credentials.clear(&entry.id).await {
                warn!(session_id = %entry.id, error = %e, "Failed to clear credentials after logout");
            }
            return;
        }

        self.schedule_reconnect(entry, generation);
    }

    async fn on_message(
        &self,
        entry: &SessionEntry,
        sender_id: String,
        body_text: String,
        from_self: bool,
        timestamp: DateTime<Utc>,
    ) {
        debug!(session_id = %entry.id, sender = %sender_id, from_self, "Message received");
        if !self.config.persist_inbound_messages {
            return;
        }
        self.publisher
            .record_message(&MessageRecord {
                session_id: entry.id.clone(),
                number: sender_id,
                message: body_text,
                from_self,
                created_at: timestamp,
            })
            .await;
    }
}
