//! ICE server configuration handed to every negotiation object.

use serde::{Deserialize, Serialize};

/// A single STUN/TURN server entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Peer negotiation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
    /// Send candidates as they are gathered instead of in one bulk exchange.
    pub trickle: bool,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![
                IceServerConfig::stun("stun:stun.l.google.com:19302"),
                IceServerConfig::stun("stun:stun1.l.google.com:19302"),
                IceServerConfig::stun("stun:stun2.l.google.com:19302"),
                IceServerConfig::stun("stun:stun3.l.google.com:19302"),
                IceServerConfig::stun("stun:stun4.l.google.com:19302"),
            ],
            trickle: true,
        }
    }
}
