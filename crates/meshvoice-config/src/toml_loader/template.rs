//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# meshvoice configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[media]
# echo_cancellation = true
# noise_suppression = true
# auto_gain_control = true

[ice]
# trickle = true
#
# [[ice.servers]]
# urls = ["stun:stun.l.google.com:19302"]
#
# [[ice.servers]]
# urls = ["turn:turn.example.com:3478"]
# username = "user"
# credential = "secret"

[signaling]
# mailbox_url = "ws://127.0.0.1:8090/ws"
# room_prefix = "gamerooms"
# collection = "signals"

[playback]
# volume = 1.0           # 0.0-1.0

[logging]
# level = "info"         # trace, debug, info, warn, error
"##
    .to_string()
}
