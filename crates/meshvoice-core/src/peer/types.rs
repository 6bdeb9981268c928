//! Negotiation seam and peer snapshots.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use meshvoice_common::{NegotiationError, ParticipantId};
use meshvoice_config::schema::IceServerConfig;
use tokio::sync::mpsc;

use super::state::PeerState;
use crate::media::LocalCapture;
use crate::playback::InboundStream;
use crate::protocol::SignalPayload;

/// Everything a negotiation object needs to start.
#[derive(Debug, Clone)]
pub struct NegotiatorOptions {
    pub remote: ParticipantId,
    /// Whether this side originates the offer.
    pub initiator: bool,
    /// Local audio attached to the connection.
    pub capture: Arc<LocalCapture>,
    pub ice_servers: Vec<IceServerConfig>,
    pub trickle: bool,
}

/// Reported by a negotiation object, in the order it happened.
pub enum NegotiationEvent {
    /// Outgoing payload to relay to the remote participant.
    Signal(SignalPayload),
    /// Remote media arrived.
    Stream(Arc<dyn InboundStream>),
    Connected,
    Error(NegotiationError),
    Closed,
}

impl fmt::Debug for NegotiationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(_) => f.write_str("Signal"),
            Self::Stream(stream) => write!(f, "Stream({})", stream.id()),
            Self::Connected => f.write_str("Connected"),
            Self::Error(e) => write!(f, "Error({e})"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

/// A live negotiation object (offer/answer plus candidate exchange).
pub trait Negotiator: Send + Sync {
    /// Feed one payload from the remote side.
    fn signal(&self, payload: &SignalPayload) -> Result<(), NegotiationError>;
    /// Tear down the connection. Safe to call more than once.
    fn destroy(&self);
}

/// A freshly built negotiation object and its event stream.
pub struct NegotiatorParts {
    pub negotiator: Box<dyn Negotiator>,
    pub events: mpsc::UnboundedReceiver<NegotiationEvent>,
}

/// Builds negotiation objects. Construction may take time.
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    async fn create(&self, options: NegotiatorOptions) -> Result<NegotiatorParts, NegotiationError>;
}

/// Point-in-time view of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub participant: ParticipantId,
    pub initiator: bool,
    pub state: PeerState,
    pub has_stream: bool,
    /// Whether the negotiation object is built yet.
    pub ready: bool,
}
