//! Query façade
//!
//! The surface external callers (HTTP handlers, CLIs) use. Session ids
//! arrive as raw strings and are validated here; every failure is returned
//! as a structured [`ApiError`].

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::coordinator::SessionManager;
use crate::errors::SessionError;
use crate::pairing::PairingChallenge;
use crate::types::{SessionId, SessionState, SessionStatus, StartOutcome};

/// Structured error returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{error}: {details}")]
pub struct ApiError {
    /// Machine-readable category
    pub error: String,
    /// Human-readable description
    pub details: String,
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self {
            error: e.category().to_string(),
            details: e.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Answer to a pairing challenge request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairingResult {
    /// A challenge is available to render
    Ready(PairingChallenge),
    /// No challenge yet; the session is in `state`
    Pending { state: SessionState },
}

#[derive(Debug, Clone)]
pub struct SessionApi {
    manager: Arc<SessionManager>,
}

impl SessionApi {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub async fn start(&self, session_id: &str) -> ApiResult<StartOutcome> {
        let id = SessionId::parse(session_id)?;
        Ok(self.manager.start(&id).await?)
    }

    /// Never starts a session
    pub async fn get_status(&self, session_id: &str) -> ApiResult<SessionStatus> {
        let id = SessionId::parse(session_id)?;
        Ok(self.manager.status(&id).await)
    }

    /// Current challenge, starting the session first if it is not live.
    /// Does not wait for a challenge to arrive.
    pub async fn get_pairing_challenge(&self, session_id: &str) -> ApiResult<PairingResult> {
        let id = SessionId::parse(session_id)?;
        if !self.manager.is_live(&id) {
            debug!(session_id = %id, "Lazily starting session for pairing challenge");
            self.manager.start(&id).await?;
        }

        if let Some(challenge) = self.manager.pairing_challenge(&id) {
            return Ok(PairingResult::Ready(challenge));
        }
        let state = self
            .manager
            .snapshot(&id)
            .map(|s| s.state)
            .unwrap_or(SessionState::NotStarted);
        Ok(PairingResult::Pending { state })
    }

    pub async fn teardown(&self, session_id: &str) -> ApiResult<()> {
        let id = SessionId::parse(session_id)?;
        Ok(self.manager.teardown(&id).await?)
    }

    pub async fn send_message(&self, session_id: &str, recipient: &str, body: &str) -> ApiResult<()> {
        let id = SessionId::parse(session_id)?;
        Ok(self.manager.send_message(&id, recipient, body).await?)
    }
}
