//! Configuration schema types for meshvoice.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod ice;
mod media;
mod playback;
mod signaling;
mod system;

pub use ice::*;
pub use media::*;
pub use playback::*;
pub use signaling::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
///
/// Only override what you want to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct MeshVoiceConfig {
    pub media: MediaConfig,
    pub ice: IceConfig,
    pub signaling: SignalingConfig,
    pub playback: PlaybackConfig,
    pub logging: LoggingConfig,
}

// =============================================================================
// Tests
// =============================================================================
