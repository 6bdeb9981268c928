use serde::{Deserialize, Serialize};

/// Remote audio playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Nominal volume for every inbound stream (0.0-1.0).
    pub volume: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}
