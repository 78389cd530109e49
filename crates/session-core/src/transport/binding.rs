//! Raw event translation

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::trace;

use super::{RawConnectionState, RawInboundMessage, RawTransportEvent};
use crate::credentials::CredentialMaterial;
use crate::types::{DisconnectReason, Identity};

/// Events the session manager reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum BindingEvent {
    /// New credential material to merge and persist
    CredentialsChanged(CredentialMaterial),

    ConnectionStateChanged {
        raw_state: Option<RawConnectionState>,
        pairing_challenge: Option<String>,
        disconnect_reason: Option<DisconnectReason>,
        identity: Option<Identity>,
    },

    MessageReceived {
        sender_id: String,
        body_text: String,
        from_self: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Translate one raw event. Message batches fan out into one event per
/// message; messages without a text body are dropped.
pub fn translate(raw: RawTransportEvent) -> Vec<BindingEvent> {
    match raw {
        RawTransportEvent::CredsUpdate(material) => vec![BindingEvent::CredentialsChanged(material)],
        RawTransportEvent::ConnectionUpdate(update) => {
            if update.connection.is_none() && update.qr.is_none() {
                return Vec::new();
            }
            vec![BindingEvent::ConnectionStateChanged {
                raw_state: update.connection,
                pairing_challenge: update.qr,
                disconnect_reason: update.disconnect_reason,
                identity: update.identity,
            }]
        }
        RawTransportEvent::MessagesUpsert(messages) => messages.into_iter().filter_map(message_event).collect(),
    }
}

fn message_event(msg: RawInboundMessage) -> Option<BindingEvent> {
    let body = msg
        .conversation
        .filter(|s| !s.is_empty())
        .or(msg.extended_text.filter(|s| !s.is_empty()));
    let Some(body_text) = body else {
        trace!(sender = %msg.remote_jid, "Dropping message without text body");
        return None;
    };
    Some(BindingEvent::MessageReceived {
        sender_id: msg.remote_jid,
        body_text,
        from_self: msg.from_me,
        timestamp: msg.timestamp.unwrap_or_else(Utc::now),
    })
}

/// Ordered stream of [`BindingEvent`]s for one connection
pub struct EventBinding {
    raw: mpsc::Receiver<RawTransportEvent>,
    pending: VecDeque<BindingEvent>,
}

impl EventBinding {
    pub fn new(raw: mpsc::Receiver<RawTransportEvent>) -> Self {
        Self {
            raw,
            pending: VecDeque::new(),
        }
    }

    /// Next translated event, or `None` once the provider dropped its sender
    pub async fn next_event(&mut self) -> Option<BindingEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let raw = self.raw.recv().await?;
            self.pending.extend(translate(raw));
        }
    }
}
