//! Core session types
//!
//! The tenant-facing vocabulary of the crate: validated [`SessionId`]s, the
//! lifecycle [`SessionState`] machine, account [`Identity`], and the
//! read-only [`SessionSnapshot`]/[`SessionStatus`] views handed to callers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// Externally supplied tenant session identifier
///
/// Session ids double as the name of the per-session credential namespace,
/// so they are restricted to a filesystem-safe alphabet: ASCII letters,
/// digits, `-`, `_`, `.`, `@` and `+`, at most [`SessionId::MAX_LEN`]
/// bytes, and never starting with `.`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Longest accepted id, in bytes
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap a raw session id
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, SessionError> {
        let raw = raw.as_ref();
        if raw.is_empty() {
            return Err(SessionError::invalid_session_id(raw, "session id is required"));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(SessionError::invalid_session_id(
                raw,
                format!("longer than {} bytes", Self::MAX_LEN),
            ));
        }
        if raw.starts_with('.') {
            return Err(SessionError::invalid_session_id(raw, "must not start with '.'"));
        }
        if let Some(bad) = raw.chars().find(|c| !Self::is_allowed(*c)) {
            return Err(SessionError::invalid_session_id(
                raw,
                format!("character {:?} is not allowed", bad),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    fn is_allowed(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+')
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = SessionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a tenant session
///
/// ```text
///  NotStarted ──start──▶ Starting ──challenge──▶ AwaitingPairing ◀─┐
///                          │  │                    │   │  └challenge┘
///                          │  └───────open─────────┼──▶ Connected
///                          │ failure               │        │ close
///                          ▼                       ▼        ▼
///                        Error ◀──────────────  Disconnected
///                          └────── start / reconnect ──▶ Starting
/// ```
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Starting,
    /// Waiting for a device to present the current pairing challenge
    #[serde(rename = "qr")]
    AwaitingPairing,
    Connected,
    Disconnected,
    Error,
}

impl SessionState {
    /// Status string used in durable records and at the façade
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::AwaitingPairing => "qr",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// States in which the session owns a live connection handle
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::AwaitingPairing | Self::Connected)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, NotStarted) => true,
            (NotStarted | Disconnected | Error, Starting) => true,
            (Starting | AwaitingPairing, AwaitingPairing | Connected | Disconnected | Error) => true,
            (Connected, Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "starting" => Ok(Self::Starting),
            "qr" => Ok(Self::AwaitingPairing),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "error" => Ok(Self::Error),
            other => Err(SessionError::internal(format!("unknown session status '{}'", other))),
        }
    }
}

/// Account a session is linked to, known once connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Account identifier on the messaging network (usually the phone number)
    pub account_id: String,
    /// Human readable account name, if the network exposes one
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(account_id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            account_id: account_id.into(),
            display_name,
        }
    }
}

/// Why the transport closed a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The account unlinked this device; credentials are no longer valid
    LoggedOut,
    ConnectionClosed,
    ConnectionLost,
    TimedOut,
    /// The provider asks for a fresh connection (e.g. right after pairing)
    RestartRequired,
    /// Another connection for the same account took over
    ConnectionReplaced,
    Other(String),
}

impl DisconnectReason {
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged_out"),
            Self::ConnectionClosed => f.write_str("connection_closed"),
            Self::ConnectionLost => f.write_str("connection_lost"),
            Self::TimedOut => f.write_str("timed_out"),
            Self::RestartRequired => f.write_str("restart_required"),
            Self::ConnectionReplaced => f.write_str("connection_replaced"),
            Self::Other(reason) => write!(f, "other({})", reason),
        }
    }
}

/// Point-in-time copy of an in-memory session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: SessionState,
    /// Present only while `state == AwaitingPairing`
    pub pairing_challenge: Option<String>,
    pub identity: Option<Identity>,
    pub last_error: Option<String>,
    pub disconnect_reason: Option<DisconnectReason>,
    /// Consecutive reconnection attempts since the last successful connect
    pub reconnect_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Where a [`SessionStatus`] answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// The session table of this process
    Live,
    /// The durable record store (or its in-process cache)
    Persisted,
    /// Nothing is known about the session
    Unknown,
}

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub identity: Option<Identity>,
    pub source: StatusSource,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
    pub fn not_started(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: SessionState::NotStarted,
            identity: None,
            source: StatusSource::Unknown,
            updated_at: None,
        }
    }
}

impl From<&SessionSnapshot> for SessionStatus {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id.clone(),
            state: snapshot.state,
            identity: snapshot.identity.clone(),
            source: StatusSource::Live,
            updated_at: Some(snapshot.updated_at),
        }
    }
}

/// Broadcast whenever a session changes state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatusChanged {
    pub session_id: SessionId,
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// What `start` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new connection attempt was opened
    Started,
    /// A live connection already existed; nothing was done
    AlreadyActive,
}

/// Counts of the sessions in the table by state
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub starting: usize,
    pub awaiting_pairing: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub error: usize,
}
