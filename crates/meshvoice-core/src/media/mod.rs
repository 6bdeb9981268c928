//! Local microphone capture: single acquisition, mute, release.

mod controller;
mod types;

pub use controller::LocalMediaController;
pub use types::{AudioConstraints, AudioTrack, CaptureDevice, LocalCapture};
