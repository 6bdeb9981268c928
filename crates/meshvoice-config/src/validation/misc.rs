//! Validation for the ICE, signaling, and playback sections.

use std::sync::OnceLock;

use regex::Regex;

use crate::schema::MeshVoiceConfig;

use super::helpers::{validate_non_empty, validate_range_f64};

fn ice_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(stun|turns?):[^\s]+$").expect("valid ICE url pattern"))
}

/// Validate ICE server entries.
pub(crate) fn validate_ice(errors: &mut Vec<String>, config: &MeshVoiceConfig) {
    if config.ice.servers.is_empty() {
        errors.push("ice.servers must contain at least one server".into());
    }
    for (i, server) in config.ice.servers.iter().enumerate() {
        if server.urls.is_empty() {
            errors.push(format!("ice.servers[{i}].urls must not be empty"));
        }
        for url in &server.urls {
            if !ice_url_pattern().is_match(url) {
                errors.push(format!(
                    "ice.servers[{i}].urls: '{url}' is not a stun:, turn: or turns: url"
                ));
            }
        }
    }
}

/// Validate mailbox location.
pub(crate) fn validate_signaling(errors: &mut Vec<String>, config: &MeshVoiceConfig) {
    let url = &config.signaling.mailbox_url;
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        errors.push(format!(
            "signaling.mailbox_url: '{url}' must start with ws:// or wss://"
        ));
    }
    validate_non_empty(errors, "signaling.room_prefix", &config.signaling.room_prefix);
    validate_non_empty(errors, "signaling.collection", &config.signaling.collection);
}

/// Validate playback constraints.
pub(crate) fn validate_playback(errors: &mut Vec<String>, config: &MeshVoiceConfig) {
    validate_range_f64(
        errors,
        "playback.volume",
        config.playback.volume,
        0.0,
        1.0,
    );
}
