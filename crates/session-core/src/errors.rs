//! Error types for session-core
//!
//! [`SessionError`] is the error every public operation returns. Component
//! errors ([`CredentialError`], [`TransportError`], [`StoreError`]) are
//! defined next to their component and convert into it with `?`.

use thiserror::Error;

pub use crate::credentials::CredentialError;
pub use crate::store::StoreError;
pub use crate::transport::TransportError;

/// Result type for session-core operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session manager and its façade
#[derive(Debug, Error)]
pub enum SessionError {
    /// The caller supplied a missing or malformed session id
    #[error("Invalid session id '{id}': {reason}")]
    InvalidSessionId { id: String, reason: String },

    /// The request was malformed (empty recipient, empty body, ...)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The session exists but has no open connection
    #[error("Session {session_id} not connected")]
    NotConnected { session_id: String },

    /// The session was torn down while the operation was in flight
    #[error("Session {session_id} was torn down")]
    TornDown { session_id: String },

    /// Loading, persisting or clearing credential material failed
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The transport provider failed to connect or deliver
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The durable record store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal invariant violated
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<tenantlink_infra_common::Error> for SessionError {
    fn from(e: tenantlink_infra_common::Error) -> Self {
        match e {
            tenantlink_infra_common::Error::Config(message) => Self::Configuration { message },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl SessionError {
    /// Create an invalid session id error
    pub fn invalid_session_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSessionId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a not connected error
    pub fn not_connected(session_id: impl Into<String>) -> Self {
        Self::NotConnected {
            session_id: session_id.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short machine-readable category, used as the `error` code at the façade
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidSessionId { .. } | Self::InvalidRequest { .. } => "validation",
            Self::NotConnected { .. } => "session_not_connected",
            Self::TornDown { .. } => "session_torn_down",
            Self::Credential(_) => "credentials",
            Self::Transport(_) => "transport",
            Self::Store(_) => "store",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidSessionId { .. }
            | Self::InvalidRequest { .. }
            | Self::Configuration { .. }
            | Self::TornDown { .. } => false,
            Self::NotConnected { .. } | Self::Store(_) | Self::Credential(_) => true,
            Self::Transport(e) => e.is_recoverable(),
            Self::Internal { .. } => false,
        }
    }
}
