//! Mailbox location settings.

use serde::{Deserialize, Serialize};

/// Where negotiation payloads are relayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// WebSocket URL of the mailbox server.
    pub mailbox_url: String,
    /// Top-level collection holding rooms.
    pub room_prefix: String,
    /// Per-room collection holding signals.
    pub collection: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            mailbox_url: "ws://127.0.0.1:8090/ws".into(),
            room_prefix: "gamerooms".into(),
            collection: "signals".into(),
        }
    }
}

impl SignalingConfig {
    /// Mailbox scope for a room, e.g. `gamerooms/lobby/signals`.
    pub fn room_scope(&self, room_id: &str) -> String {
        format!("{}/{}/{}", self.room_prefix, room_id, self.collection)
    }
}
