//! Peer connection manager: one negotiated audio connection per remote
//! participant.

mod handle;
mod manager;
mod state;
mod types;

pub use manager::PeerConnectionManager;
pub use state::{transition, PeerInput, PeerState};
pub use types::{
    NegotiationEvent, Negotiator, NegotiatorFactory, NegotiatorOptions, NegotiatorParts,
    PeerSnapshot,
};
