use std::fmt;
use std::sync::Arc;

use meshvoice_common::PlaybackError;

/// Remote audio delivered by a peer connection.
pub trait InboundStream: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
}

/// A live output bound to one inbound stream.
pub trait Playback: Send + Sync {
    /// Begin audible output. May fail with `AutoplayRejected` when the
    /// platform requires a user gesture first.
    fn start(&mut self) -> Result<(), PlaybackError>;
    /// Silence and tear down the output.
    fn stop(&mut self);
}

/// Platform audio output.
pub trait PlaybackBackend: Send + Sync {
    fn open(
        &self,
        stream: Arc<dyn InboundStream>,
        volume: f64,
    ) -> Result<Box<dyn Playback>, PlaybackError>;
}
