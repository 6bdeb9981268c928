//! Per-peer lifecycle.

use std::fmt;

use serde::Serialize;

/// Lifecycle of one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// Registered; the negotiation object may still be under construction.
    New,
    /// At least one payload has been exchanged.
    Negotiating,
    /// Media is flowing.
    Connected,
    /// Terminal. A closed handle never reopens; a fresh handle is created instead.
    Closed,
}

impl PeerState {
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerInput {
    SignalOut,
    SignalIn,
    StreamReady,
    Connected,
    Error,
    Closed,
}

/// Next state for `input` in `state`, or `None` when the input is rejected.
///
/// Every input is rejected once closed.
pub fn transition(state: PeerState, input: PeerInput) -> Option<PeerState> {
    use PeerInput as I;
    use PeerState as S;

    match (state, input) {
        (S::Closed, _) => None,
        (_, I::Error | I::Closed) => Some(S::Closed),
        (S::New | S::Negotiating, I::SignalOut | I::SignalIn) => Some(S::Negotiating),
        (S::Connected, I::SignalOut | I::SignalIn) => Some(S::Connected),
        (_, I::Connected) => Some(S::Connected),
        (s, I::StreamReady) => Some(s),
    }
}
