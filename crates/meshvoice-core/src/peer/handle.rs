use std::sync::Arc;

use meshvoice_common::ParticipantId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::state::{transition, PeerInput, PeerState};
use super::types::{Negotiator, PeerSnapshot};
use crate::playback::InboundStream;
use crate::protocol::SignalPayload;

/// Table entry for one remote participant.
pub(crate) struct PeerHandle {
    /// Distinguishes this handle from earlier ones for the same participant.
    pub(crate) epoch: u64,
    pub(crate) initiator: bool,
    pub(crate) state: PeerState,
    /// `None` while the negotiation object is being built.
    pub(crate) negotiator: Option<Arc<dyn Negotiator>>,
    /// Inbound payloads that arrived during construction, in arrival order.
    pub(crate) queued: Vec<SignalPayload>,
    pub(crate) stream: Option<Arc<dyn InboundStream>>,
    /// Dropping this stops the reaction task.
    pub(crate) _stop_reactions: oneshot::Sender<()>,
    /// Set once the negotiation object is installed.
    pub(crate) reactions: Option<JoinHandle<()>>,
}

impl PeerHandle {
    pub(crate) fn reserve(epoch: u64, initiator: bool, stop: oneshot::Sender<()>) -> Self {
        Self {
            epoch,
            initiator,
            state: PeerState::New,
            negotiator: None,
            queued: Vec::new(),
            stream: None,
            _stop_reactions: stop,
            reactions: None,
        }
    }

    /// Apply `input`. Returns the previous state if the input was accepted.
    pub(crate) fn apply(&mut self, input: PeerInput) -> Option<PeerState> {
        let next = transition(self.state, input)?;
        Some(std::mem::replace(&mut self.state, next))
    }

    pub(crate) fn snapshot(&self, participant: &ParticipantId) -> PeerSnapshot {
        PeerSnapshot {
            participant: participant.clone(),
            initiator: self.initiator,
            state: self.state,
            has_stream: self.stream.is_some(),
            ready: self.negotiator.is_some(),
        }
    }
}
