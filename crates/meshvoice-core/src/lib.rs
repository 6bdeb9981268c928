//! Peer-to-peer voice for game rooms.
//!
//! Each participant holds one negotiated audio connection to every other
//! member of its room (a full mesh). Negotiation payloads travel through a
//! shared room mailbox: a payload is written as an entry addressed to its
//! recipient, picked up by the recipient's live watch and then deleted.
//!
//! The platform pieces (microphone, negotiation objects, audio output,
//! mailbox backend) sit behind traits so the session logic runs the same
//! against browsers, native stacks or in-process fakes.

pub mod media;
pub mod peer;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod signaling;

#[cfg(test)]
pub(crate) mod test_support;

pub use media::{AudioConstraints, AudioTrack, CaptureDevice, LocalCapture, LocalMediaController};
pub use peer::{
    NegotiationEvent, Negotiator, NegotiatorFactory, NegotiatorOptions, NegotiatorParts,
    PeerConnectionManager, PeerSnapshot, PeerState,
};
pub use playback::{AudioOutputSink, InboundStream, Playback, PlaybackBackend};
pub use protocol::{
    ChangeKind, EntryId, MailboxChange, MailboxEntry, MailboxField, SignalPayload,
    SignalingMessage,
};
pub use session::{
    PresenceNotification, RoomParticipant, SessionConfig, SessionStatus, VoiceEvent, VoiceSession,
};
pub use signaling::remote::{WsMailbox, WsMailboxConfig};
pub use signaling::{MailboxStore, MemoryMailbox, SignalHandler, SignalingRelay};
