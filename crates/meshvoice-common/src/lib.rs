pub mod errors;
pub mod events;
pub mod id;

pub use errors::{
    ConfigError, MailboxError, MediaError, MeshVoiceError, NegotiationError, PlaybackError,
    SignalingError,
};
pub use events::EventBus;
pub use id::{new_id, ParticipantId};

pub type Result<T> = std::result::Result<T, MeshVoiceError>;
