//! Wire frames and client configuration for the remote mailbox.

use meshvoice_config::schema::SignalingConfig;
use serde::{Deserialize, Serialize};

use crate::protocol::{ChangeKind, EntryId, MailboxEntry, MailboxField, SignalingMessage};

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Client to server. Every frame carries a `req` the server echoes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Append {
        req: u64,
        room: String,
        message: SignalingMessage,
    },
    Delete {
        req: u64,
        room: String,
        id: EntryId,
    },
    Query {
        req: u64,
        room: String,
        field: MailboxField,
        value: String,
    },
    Watch {
        req: u64,
        room: String,
        field: MailboxField,
        value: String,
    },
    Unwatch {
        req: u64,
        watch: u64,
    },
}

impl ClientFrame {
    pub fn req(&self) -> u64 {
        match self {
            Self::Append { req, .. }
            | Self::Delete { req, .. }
            | Self::Query { req, .. }
            | Self::Watch { req, .. }
            | Self::Unwatch { req, .. } => *req,
        }
    }
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ok {
        req: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<EntryId>,
    },
    Entries {
        req: u64,
        entries: Vec<MailboxEntry>,
    },
    Watching {
        req: u64,
        watch: u64,
    },
    Change {
        watch: u64,
        kind: ChangeKind,
        entry: MailboxEntry,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req: Option<u64>,
        message: String,
    },
}

impl ServerFrame {
    /// The request this frame answers. `Change` frames answer none.
    pub fn req(&self) -> Option<u64> {
        match self {
            Self::Ok { req, .. } | Self::Entries { req, .. } | Self::Watching { req, .. } => {
                Some(*req)
            }
            Self::Change { .. } => None,
            Self::Error { req, .. } => *req,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for [`WsMailbox`](super::WsMailbox).
#[derive(Debug, Clone)]
pub struct WsMailboxConfig {
    /// Server endpoint, e.g. `ws://127.0.0.1:8090/ws`.
    pub url: String,
    /// Room scope, e.g. `gamerooms/lobby/signals`.
    pub room: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
}

impl WsMailboxConfig {
    pub fn new(url: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            room: room.into(),
            connect_timeout_secs: 15,
            request_timeout_secs: 10,
            heartbeat_interval_secs: 30,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }

    /// Settings for `room_id` on the configured server, scoped as
    /// `{room_prefix}/{room_id}/{collection}`.
    pub fn from_config(config: &SignalingConfig, room_id: &str) -> Self {
        Self::new(config.mailbox_url.clone(), config.room_scope(room_id))
    }
}
