//! Types, configuration, and events for a voice session.

use meshvoice_common::ParticipantId;
use meshvoice_config::schema::IceConfig;
use meshvoice_config::MeshVoiceConfig;
use serde::{Deserialize, Serialize};

use crate::media::AudioConstraints;
use crate::peer::PeerState;

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// A member of the room as reported by the presence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomParticipant {
    pub id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl RoomParticipant {
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Membership change delivered by the room's presence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceNotification {
    Joined(RoomParticipant),
    Left(ParticipantId),
    /// Full current membership, e.g. after the presence layer reconnects.
    Snapshot(Vec<RoomParticipant>),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events emitted by the voice system for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    SessionStarted {
        peers: usize,
    },
    SessionStopped,
    PeerStateChanged {
        participant: ParticipantId,
        state: PeerState,
    },
    PeerRemoved {
        participant: ParticipantId,
    },
    MuteChanged {
        muted: bool,
    },
    Error(String),
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Observable session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub active: bool,
    /// Set while `start_session` is acquiring media and subscribing.
    pub connecting: bool,
    pub muted: bool,
    pub connected_peers: usize,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for one participant's voice session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub local_id: ParticipantId,
    pub constraints: AudioConstraints,
    pub ice: IceConfig,
    pub volume: f64,
}

impl SessionConfig {
    pub fn new(local_id: impl Into<ParticipantId>) -> Self {
        Self::from_config(local_id, &MeshVoiceConfig::default())
    }

    pub fn from_config(local_id: impl Into<ParticipantId>, config: &MeshVoiceConfig) -> Self {
        Self {
            local_id: local_id.into(),
            constraints: AudioConstraints::from(&config.media),
            ice: config.ice.clone(),
            volume: config.playback.volume,
        }
    }
}
