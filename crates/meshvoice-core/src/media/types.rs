//! Capture device seam and the handle to acquired local audio.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use meshvoice_common::{new_id, MediaError};
use meshvoice_config::schema::MediaConfig;

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// Processing requested from the capture device. Video is never requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl From<&MediaConfig> for AudioConstraints {
    fn from(config: &MediaConfig) -> Self {
        Self {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
        }
    }
}

// ---------------------------------------------------------------------------
// Device seam
// ---------------------------------------------------------------------------

/// One captured audio track.
pub trait AudioTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    /// A disabled track stays attached to every connection but transmits silence.
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Stop the track and free the device.
    fn stop(&self);
}

/// Platform microphone access.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn acquire(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Vec<Arc<dyn AudioTrack>>, MediaError>;
}

// ---------------------------------------------------------------------------
// Capture handle
// ---------------------------------------------------------------------------

/// The session's single outgoing audio stream, shared by every peer connection.
#[derive(Debug)]
pub struct LocalCapture {
    id: String,
    tracks: Vec<Arc<dyn AudioTrack>>,
}

impl LocalCapture {
    pub(crate) fn new(tracks: Vec<Arc<dyn AudioTrack>>) -> Self {
        Self {
            id: new_id(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn AudioTrack>] {
        &self.tracks
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        for track in &self.tracks {
            track.set_enabled(enabled);
        }
    }

    pub(crate) fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
