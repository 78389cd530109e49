//! Renderable pairing challenges
//!
//! The transport provider hands out an opaque token; a device pairs by
//! scanning it as an image. Rendering is delegated to an external service,
//! so the renderable value is a URL of that service with the token in its
//! query string.

use serde::Serialize;
use url::Url;

use crate::config::PairingConfig;
use crate::errors::{Result, SessionError};

/// A pairing challenge ready to show to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingChallenge {
    /// Raw token as issued by the provider
    pub token: String,
    /// URL of the rendered image
    pub render_url: String,
}

#[derive(Debug, Clone)]
pub struct ChallengeRenderer {
    base: Url,
    param: String,
}

impl ChallengeRenderer {
    pub fn new(config: &PairingConfig) -> Result<Self> {
        let base = Url::parse(&config.render_base_url)
            .map_err(|e| SessionError::config(format!("invalid render_base_url: {}", e)))?;
        Ok(Self {
            base,
            param: config.render_param.clone(),
        })
    }

    pub fn render(&self, token: &str) -> PairingChallenge {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair(&self.param, token);
        PairingChallenge {
            token: token.to_string(),
            render_url: url.into(),
        }
    }
}
