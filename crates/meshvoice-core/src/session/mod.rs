//! Voice session lifecycle and room membership bridging.

mod bridge;
mod types;

pub use bridge::VoiceSession;
pub use types::{PresenceNotification, RoomParticipant, SessionConfig, SessionStatus, VoiceEvent};
