//! Transport Provider Binding
//!
//! The transport provider is the external library that speaks the messaging
//! network's wire protocol. This module defines the seam to it:
//!
//! - [`TransportProvider`] opens a connection for a session from its
//!   credential material.
//! - [`TransportHandle`] is the live connection, owned by the session entry.
//! - [`RawTransportEvent`] is what the provider emits, in order, on the
//!   connection's event channel.
//! - [`EventBinding`] translates raw events into the three [`BindingEvent`]
//!   kinds the session manager consumes. It holds no retry logic.

mod binding;

pub use binding::{translate, BindingEvent, EventBinding};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::credentials::CredentialMaterial;
use crate::types::{DisconnectReason, Identity, SessionId};

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised by a transport provider
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {message}")]
    ConnectFailed { message: String },

    #[error("Send failed: {message}")]
    SendFailed { message: String },

    #[error("Connection closed")]
    Closed,

    #[error("Credentials rejected: {message}")]
    Unauthorized { message: String },
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            message: message.into(),
        }
    }

    pub fn send(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }

    /// Whether the same call may succeed later
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Unauthorized { .. })
    }
}

/// Raw connection state reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawConnectionState {
    Connecting,
    Open,
    Close,
}

/// A connection update as the provider reports it. Every field is optional;
/// a provider may send only a fresh pairing token, only a state, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawConnectionUpdate {
    pub connection: Option<RawConnectionState>,
    pub qr: Option<String>,
    pub disconnect_reason: Option<DisconnectReason>,
    pub identity: Option<Identity>,
}

impl RawConnectionUpdate {
    pub fn challenge(token: impl Into<String>) -> Self {
        Self {
            qr: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn open(identity: Option<Identity>) -> Self {
        Self {
            connection: Some(RawConnectionState::Open),
            identity,
            ..Default::default()
        }
    }

    pub fn close(reason: DisconnectReason) -> Self {
        Self {
            connection: Some(RawConnectionState::Close),
            disconnect_reason: Some(reason),
            ..Default::default()
        }
    }
}

/// One entry of a provider message upsert batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInboundMessage {
    pub remote_jid: String,
    pub from_me: bool,
    /// Plain text body
    pub conversation: Option<String>,
    /// Text of a rich (quoted, linked) message
    pub extended_text: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawInboundMessage {
    pub fn text(remote_jid: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            remote_jid: remote_jid.into(),
            conversation: Some(body.into()),
            ..Default::default()
        }
    }
}

/// Events emitted by the provider on a connection's event channel
#[derive(Debug, Clone, PartialEq)]
pub enum RawTransportEvent {
    /// Partial credential update to merge into the session's material
    CredsUpdate(CredentialMaterial),
    ConnectionUpdate(RawConnectionUpdate),
    MessagesUpsert(Vec<RawInboundMessage>),
}

/// Live connection to the messaging network
#[async_trait]
pub trait TransportHandle: Send + Sync + 'static {
    /// Identity of the linked account, once the connection is open
    fn account_identity(&self) -> Option<Identity>;

    /// Deliver a text message
    async fn send_text(&self, recipient: &str, body: &str) -> TransportResult<()>;

    /// Close the connection. Must be idempotent.
    async fn close(&self);
}

/// A freshly opened connection: its handle and its event stream
pub struct TransportConnection {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::Receiver<RawTransportEvent>,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection").finish_non_exhaustive()
    }
}

/// Factory for connections to the messaging network
#[async_trait]
pub trait TransportProvider: Send + Sync + 'static {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: CredentialMaterial,
    ) -> TransportResult<TransportConnection>;
}
