use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures from acquiring the local capture device. Fatal to a session start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("no microphone found")]
    DeviceNotFound,

    #[error("failed to access microphone: {0}")]
    DeviceError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox unavailable: {0}")]
    Unavailable(String),

    #[error("mailbox connection lost")]
    Disconnected,

    #[error("mailbox entry not found: {0}")]
    NotFound(String),

    #[error("mailbox protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    #[error("failed to publish signal: {0}")]
    PublishFailed(#[source] MailboxError),

    #[error("failed to subscribe to signals: {0}")]
    Subscribe(#[source] MailboxError),

    #[error("invalid signal payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("failed to construct peer connection: {0}")]
    Construction(String),

    #[error("peer connection error: {0}")]
    Peer(String),

    #[error("failed to apply signal: {0}")]
    SignalRejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("autoplay rejected: {0}")]
    AutoplayRejected(String),

    #[error("playback error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MeshVoiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
