//! Session manager configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `TENANTLINK__*` environment variables (`__` separates nesting levels, e.g.
//! `TENANTLINK__RECONNECT__INITIAL_DELAY_MS=5000`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tenantlink_infra_common::errors::{Error as InfraError, ErrorContext, ErrorExt};
use url::Url;

use crate::errors::{Result, SessionError};

/// Prefix of the environment variables read by [`SessionManagerConfig::load`]
pub const ENV_PREFIX: &str = "TENANTLINK";

/// Reconnection back-off settings
///
/// The defaults reproduce a constant 3 second delay. A `multiplier` above
/// 1.0 turns it into bounded exponential back-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Randomize each delay by ±10%
    pub jitter: bool,
    /// Stop scheduling after this many consecutive attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 3_000,
            max_delay_ms: 60_000,
            multiplier: 1.0,
            jitter: false,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Where pairing challenges are rendered for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Base URL of the external image rendering service
    pub render_base_url: String,
    /// Query parameter that carries the challenge token
    pub render_param: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            render_base_url: "https://api.qrserver.com/v1/create-qr-code/".to_string(),
            render_param: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManagerConfig {
    /// Root of the per-session credential namespaces
    pub credentials_dir: PathBuf,
    /// Capacity of the status change broadcast channel
    pub event_channel_capacity: usize,
    pub reconnect: ReconnectConfig,
    pub pairing: PairingConfig,
    pub persist_inbound_messages: bool,
    pub persist_outbound_messages: bool,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            credentials_dir: PathBuf::from("./auth"),
            event_channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
            pairing: PairingConfig::default(),
            persist_inbound_messages: true,
            persist_outbound_messages: true,
        }
    }
}

impl SessionManagerConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let source = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());
        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| InfraError::Config(e.to_string()))
            .context(ErrorContext::new("session-core", "load_config").with_details(source))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(SessionError::config("event_channel_capacity must be greater than 0"));
        }
        let reconnect = &self.reconnect;
        if reconnect.initial_delay_ms == 0 {
            return Err(SessionError::config("reconnect.initial_delay_ms must be greater than 0"));
        }
        if reconnect.multiplier.is_nan() || reconnect.multiplier < 1.0 {
            return Err(SessionError::config("reconnect.multiplier must be at least 1.0"));
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(SessionError::config(
                "reconnect.max_delay_ms must not be less than reconnect.initial_delay_ms",
            ));
        }
        if self.pairing.render_param.is_empty() {
            return Err(SessionError::config("pairing.render_param must not be empty"));
        }
        Url::parse(&self.pairing.render_base_url).map_err(|e| {
            SessionError::config(format!(
                "pairing.render_base_url '{}' is invalid: {}",
                self.pairing.render_base_url, e
            ))
        })?;
        Ok(())
    }

    pub fn with_credentials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credentials_dir = dir.into();
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Constant reconnection delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        self.reconnect.initial_delay_ms = ms;
        self.reconnect.max_delay_ms = self.reconnect.max_delay_ms.max(ms);
        self.reconnect.multiplier = 1.0;
        self
    }

    pub fn with_pairing(mut self, pairing: PairingConfig) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_message_persistence(mut self, inbound: bool, outbound: bool) -> Self {
        self.persist_inbound_messages = inbound;
        self.persist_outbound_messages = outbound;
        self
    }
}
