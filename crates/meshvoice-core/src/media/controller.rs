//! Owns the local capture for the lifetime of a voice session.

use std::sync::Arc;

use meshvoice_common::MediaError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{AudioConstraints, CaptureDevice, LocalCapture};

struct MediaState {
    capture: Option<Arc<LocalCapture>>,
    muted: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Acquires the microphone at most once per session and toggles mute.
///
/// The state lock is held across the device call, so concurrent callers of
/// [`acquire`](Self::acquire) wait for the first acquisition and share it.
pub struct LocalMediaController {
    device: Arc<dyn CaptureDevice>,
    constraints: AudioConstraints,
    state: Mutex<MediaState>,
}

impl LocalMediaController {
    pub fn new(device: Arc<dyn CaptureDevice>, constraints: AudioConstraints) -> Self {
        Self {
            device,
            constraints,
            state: Mutex::new(MediaState {
                capture: None,
                muted: false,
            }),
        }
    }

    pub fn constraints(&self) -> &AudioConstraints {
        &self.constraints
    }

    /// Obtain the local capture, reusing the held one if present.
    pub async fn acquire(&self) -> Result<Arc<LocalCapture>, MediaError> {
        let mut state = self.state.lock().await;
        if let Some(capture) = &state.capture {
            debug!(capture = capture.id(), "Reusing held local audio");
            return Ok(Arc::clone(capture));
        }

        let tracks = match self.device.acquire(&self.constraints).await {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!(error = %e, "Microphone acquisition failed");
                return Err(e);
            }
        };
        if tracks.is_empty() {
            warn!("Capture device returned no audio tracks");
            return Err(MediaError::DeviceNotFound);
        }

        let capture = Arc::new(LocalCapture::new(tracks));
        state.capture = Some(Arc::clone(&capture));
        state.muted = false;
        info!(
            capture = capture.id(),
            tracks = capture.tracks().len(),
            "Local audio acquired"
        );
        Ok(capture)
    }

    /// The held capture, if any. Never touches the device.
    pub async fn current(&self) -> Option<Arc<LocalCapture>> {
        self.state.lock().await.capture.clone()
    }

    pub async fn is_held(&self) -> bool {
        self.state.lock().await.capture.is_some()
    }

    /// Enable or disable the outgoing tracks. Returns `false` when nothing
    /// is held, in which case nothing changes.
    pub async fn set_muted(&self, muted: bool) -> bool {
        let mut state = self.state.lock().await;
        let Some(capture) = &state.capture else {
            debug!(muted, "Mute ignored, no local audio held");
            return false;
        };
        capture.set_enabled(!muted);
        state.muted = muted;
        info!(muted, "Local audio mute changed");
        true
    }

    /// Flip the mute flag. Returns the new value, or `None` when nothing is held.
    pub async fn toggle_mute(&self) -> Option<bool> {
        let mut state = self.state.lock().await;
        let capture = state.capture.as_ref()?;
        let muted = !state.muted;
        capture.set_enabled(!muted);
        state.muted = muted;
        info!(muted, "Local audio mute toggled");
        Some(muted)
    }

    pub async fn is_muted(&self) -> bool {
        self.state.lock().await.muted
    }

    /// Stop every track and forget the capture. Idempotent.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.muted = false;
        if let Some(capture) = state.capture.take() {
            capture.stop();
            info!(capture = capture.id(), "Local audio released");
        }
    }
}
