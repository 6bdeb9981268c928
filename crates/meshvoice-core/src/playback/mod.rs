//! Per-participant playback of inbound audio.

mod sink;
mod types;

pub use sink::AudioOutputSink;
pub use types::{InboundStream, Playback, PlaybackBackend};
