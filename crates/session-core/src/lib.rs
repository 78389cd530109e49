//! # tenantlink-session-core
//!
//! Multi-tenant session lifecycle manager for connections to an external
//! messaging network. Each tenant session is identified by an opaque id and
//! moves through a small state machine:
//!
//! ```text
//! NotStarted -> Starting -> AwaitingPairing -> Connected -> Disconnected
//!                   \______________________________________/ (reconnect)
//! ```
//!
//! The [`SessionManager`] owns the table of sessions, opens connections
//! through a [`TransportProvider`], keeps credentials in a
//! [`CredentialStore`], publishes status through a [`RecordStore`], and
//! reconnects dropped sessions. [`SessionApi`] is the string-keyed façade
//! for external callers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenantlink_session_core::{SessionApi, SessionManagerBuilder, SessionManagerConfig};
//!
//! let manager = SessionManagerBuilder::new()
//!     .with_config(SessionManagerConfig::load(None)?)
//!     .with_transport(Arc::new(MyProvider::new()))
//!     .build()?;
//! let api = SessionApi::new(manager);
//!
//! api.start("shop-1").await?;
//! let challenge = api.get_pairing_challenge("shop-1").await?;
//! ```

pub mod api;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod errors;
pub mod pairing;
pub mod publisher;
pub mod reconnect;
pub mod store;
pub mod transport;
pub mod types;

pub use api::{ApiError, ApiResult, PairingResult, SessionApi, SessionManagerBuilder};
pub use config::{PairingConfig, ReconnectConfig, SessionManagerConfig};
pub use coordinator::SessionManager;
pub use credentials::{CredentialMaterial, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use errors::{Result, SessionError};
pub use pairing::PairingChallenge;
pub use store::{MemoryRecordStore, MessageRecord, RecordStore, SessionRecord};
#[cfg(feature = "persistence")]
pub use store::SqliteRecordStore;
pub use transport::{
    RawConnectionUpdate, RawInboundMessage, RawTransportEvent, TransportConnection, TransportHandle,
    TransportProvider,
};
pub use types::{
    DisconnectReason, Identity, SessionId, SessionSnapshot, SessionState, SessionStats, SessionStatus,
    SessionStatusChanged, StartOutcome, StatusSource,
};
