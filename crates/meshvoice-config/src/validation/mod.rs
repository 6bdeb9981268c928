//! Full configuration validation.
//!
//! Each section has its own check; this orchestrator calls them all and
//! collects errors into a single `ConfigError`.

mod helpers;
mod misc;


use crate::schema::MeshVoiceConfig;
use meshvoice_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &MeshVoiceConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    misc::validate_ice(&mut errors, config);
    misc::validate_signaling(&mut errors, config);
    misc::validate_playback(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
