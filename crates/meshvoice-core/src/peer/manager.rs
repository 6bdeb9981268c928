//! Peer table keyed by remote participant, with per-peer event reactions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use meshvoice_common::{EventBus, NegotiationError, ParticipantId};
use meshvoice_config::schema::IceConfig;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use super::handle::PeerHandle;
use super::state::{PeerInput, PeerState};
use super::types::{NegotiationEvent, Negotiator, NegotiatorFactory, NegotiatorOptions, PeerSnapshot};
use crate::media::LocalMediaController;
use crate::playback::AudioOutputSink;
use crate::protocol::SignalPayload;
use crate::session::VoiceEvent;
use crate::signaling::{SignalHandler, SignalingRelay};

struct Inner {
    local_id: ParticipantId,
    factory: Arc<dyn NegotiatorFactory>,
    media: Arc<LocalMediaController>,
    relay: Arc<SignalingRelay>,
    sink: Arc<AudioOutputSink>,
    ice: IceConfig,
    events: EventBus<VoiceEvent>,
    peers: RwLock<HashMap<ParticipantId, PeerHandle>>,
    next_epoch: AtomicU64,
}

/// A handle inserted into the table whose negotiation object is not built yet.
struct Reservation {
    epoch: u64,
    options: NegotiatorOptions,
    stop_rx: oneshot::Receiver<()>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns one negotiated connection per remote participant.
///
/// Clones share the same table. Each handle's events are processed by its
/// own task, one at a time, so outgoing payloads to a participant are
/// published in the order the negotiation object produced them.
#[derive(Clone)]
pub struct PeerConnectionManager {
    inner: Arc<Inner>,
}

impl PeerConnectionManager {
    pub fn new(
        local_id: ParticipantId,
        factory: Arc<dyn NegotiatorFactory>,
        media: Arc<LocalMediaController>,
        relay: Arc<SignalingRelay>,
        sink: Arc<AudioOutputSink>,
        ice: IceConfig,
        events: EventBus<VoiceEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_id,
                factory,
                media,
                relay,
                sink,
                ice,
                events,
                peers: RwLock::new(HashMap::new()),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.inner.local_id
    }

    /// Create a connection toward `participant` unless one exists.
    ///
    /// `initiator` defaults to the id ordering rule. Returns `Ok(true)` when
    /// a handle was created. Nothing is created while no local capture is
    /// held, or for the local participant itself.
    pub async fn ensure_peer(
        &self,
        participant: &ParticipantId,
        initiator: Option<bool>,
    ) -> Result<bool, NegotiationError> {
        let Some(reservation) = self.reserve(participant, initiator, None).await else {
            return Ok(false);
        };
        self.build(participant, reservation).await
    }

    /// Route a payload from `participant` to its negotiation object.
    ///
    /// Without a handle a responder is reserved with the payload queued, and
    /// its negotiation object is built in the background, so a slow build
    /// never holds up signals for other participants.
    pub async fn apply_remote_signal(
        &self,
        participant: &ParticipantId,
        payload: SignalPayload,
    ) -> Result<(), NegotiationError> {
        if let Some(result) = self.try_deliver(participant, &payload).await {
            return result;
        }

        let Some(reservation) = self
            .reserve(participant, Some(false), Some(payload.clone()))
            .await
        else {
            // Reserved concurrently, or no local audio.
            return match self.try_deliver(participant, &payload).await {
                Some(result) => result,
                None => {
                    debug!(participant = %participant, "No peer for signal, dropped");
                    Ok(())
                }
            };
        };

        let manager = self.clone();
        let participant = participant.clone();
        tokio::spawn(async move {
            if manager.build(&participant, reservation).await.is_err() {
                debug!(participant = %participant, "Responder not created");
            }
        });
        Ok(())
    }

    /// Tear down the handle for `participant`. Returns whether one existed.
    ///
    /// Waits for the handle's reaction task, so nothing it was publishing is
    /// still in flight once this returns.
    pub async fn remove(&self, participant: &ParticipantId) -> bool {
        self.remove_handle(participant, None, true).await
    }

    pub async fn remove_all(&self) -> usize {
        let ids: Vec<ParticipantId> = self.inner.peers.read().await.keys().cloned().collect();
        let mut removed = 0;
        for id in ids {
            if self.remove(&id).await {
                removed += 1;
            }
        }
        removed
    }

    // -- Queries ------------------------------------------------------------

    pub async fn has_peer(&self, participant: &ParticipantId) -> bool {
        self.inner.peers.read().await.contains_key(participant)
    }

    pub async fn peer_state(&self, participant: &ParticipantId) -> Option<PeerState> {
        self.inner.peers.read().await.get(participant).map(|h| h.state)
    }

    pub async fn is_initiator(&self, participant: &ParticipantId) -> Option<bool> {
        self.inner.peers.read().await.get(participant).map(|h| h.initiator)
    }

    /// Remote participants with a handle, in id order.
    pub async fn peer_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.inner.peers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn connected_count(&self) -> usize {
        self.inner
            .peers
            .read()
            .await
            .values()
            .filter(|h| h.state == PeerState::Connected)
            .count()
    }

    pub async fn snapshot(&self) -> Vec<PeerSnapshot> {
        let peers = self.inner.peers.read().await;
        let mut snapshot: Vec<_> = peers.iter().map(|(id, h)| h.snapshot(id)).collect();
        snapshot.sort_by(|a, b| a.participant.cmp(&b.participant));
        snapshot
    }

    pub async fn len(&self) -> usize {
        self.inner.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.peers.read().await.is_empty()
    }

    // -- Internals ----------------------------------------------------------

    fn emit_state(&self, participant: &ParticipantId, state: PeerState) {
        self.inner.events.publish(VoiceEvent::PeerStateChanged {
            participant: participant.clone(),
            state,
        });
    }

    /// Insert a handle for `participant` ahead of construction, with
    /// `first` already queued on it.
    async fn reserve(
        &self,
        participant: &ParticipantId,
        initiator: Option<bool>,
        first: Option<SignalPayload>,
    ) -> Option<Reservation> {
        let inner = &self.inner;
        if participant == &inner.local_id {
            debug!(participant = %participant, "Ignoring peer for local participant");
            return None;
        }
        let Some(capture) = inner.media.current().await else {
            debug!(participant = %participant, "No local audio held, peer not created");
            return None;
        };

        let initiator = initiator.unwrap_or_else(|| inner.local_id.initiates_toward(participant));
        let epoch = inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        {
            let mut peers = inner.peers.write().await;
            if peers.contains_key(participant) {
                return None;
            }
            let mut handle = PeerHandle::reserve(epoch, initiator, stop_tx);
            handle.queued.extend(first);
            peers.insert(participant.clone(), handle);
            self.emit_state(participant, PeerState::New);
        }
        info!(participant = %participant, initiator, "Creating peer connection");

        Some(Reservation {
            epoch,
            options: NegotiatorOptions {
                remote: participant.clone(),
                initiator,
                capture,
                ice_servers: inner.ice.servers.clone(),
                trickle: inner.ice.trickle,
            },
            stop_rx,
        })
    }

    /// Construct the negotiation object for a reserved handle, flush what
    /// was queued meanwhile and start its reaction task.
    async fn build(
        &self,
        participant: &ParticipantId,
        reservation: Reservation,
    ) -> Result<bool, NegotiationError> {
        let Reservation {
            epoch,
            options,
            stop_rx,
        } = reservation;
        let parts = match self.inner.factory.create(options).await {
            Ok(parts) => parts,
            Err(e) => {
                warn!(participant = %participant, error = %e, "Peer construction failed");
                self.remove_handle(participant, Some(epoch), false).await;
                return Err(e);
            }
        };
        let negotiator: Arc<dyn Negotiator> = Arc::from(parts.negotiator);

        let installed = {
            let mut peers = self.inner.peers.write().await;
            match peers.get_mut(participant) {
                Some(handle) if handle.epoch == epoch && !handle.state.is_closed() => {
                    handle.negotiator = Some(Arc::clone(&negotiator));
                    let queued = std::mem::take(&mut handle.queued);
                    if !queued.is_empty() {
                        debug!(participant = %participant, count = queued.len(), "Flushing queued signals");
                    }
                    let rejected = queued
                        .iter()
                        .filter(|payload| {
                            deliver_signal(&self.inner.events, participant, handle, payload).is_err()
                        })
                        .count();
                    if rejected > 0 {
                        debug!(participant = %participant, rejected, "Queued signals skipped");
                    }
                    handle.reactions = Some(tokio::spawn(run_reactions(
                        self.clone(),
                        participant.clone(),
                        epoch,
                        parts.events,
                        stop_rx,
                    )));
                    true
                }
                _ => false,
            }
        };
        if !installed {
            debug!(participant = %participant, "Peer removed during construction");
            negotiator.destroy();
        }
        Ok(installed)
    }

    /// Deliver to the existing handle. `None` when there is no handle.
    async fn try_deliver(
        &self,
        participant: &ParticipantId,
        payload: &SignalPayload,
    ) -> Option<Result<(), NegotiationError>> {
        let mut peers = self.inner.peers.write().await;
        let handle = peers.get_mut(participant)?;
        if handle.state.is_closed() {
            debug!(participant = %participant, "Peer closed, signal dropped");
            return Some(Ok(()));
        }
        Some(deliver_signal(&self.inner.events, participant, handle, payload))
    }

    async fn is_current(&self, participant: &ParticipantId, epoch: u64) -> bool {
        self.inner
            .peers
            .read()
            .await
            .get(participant)
            .is_some_and(|h| h.epoch == epoch && !h.state.is_closed())
    }

    /// Remove the handle, optionally only if it is still the given epoch.
    /// The table lock is released before the negotiation object is destroyed.
    /// With `join`, waits for the handle's reaction task to finish; the
    /// reaction task itself passes `false`.
    async fn remove_handle(
        &self,
        participant: &ParticipantId,
        epoch: Option<u64>,
        join: bool,
    ) -> bool {
        let handle = {
            let mut peers = self.inner.peers.write().await;
            let matches = peers
                .get(participant)
                .is_some_and(|h| epoch.map_or(true, |e| h.epoch == e));
            if matches {
                peers.remove(participant)
            } else {
                None
            }
        };
        let Some(mut handle) = handle else {
            return false;
        };

        handle.state = PeerState::Closed;
        let reactions = handle.reactions.take();
        if let Some(negotiator) = handle.negotiator.take() {
            negotiator.destroy();
        }
        drop(handle);
        if let Some(task) = reactions.filter(|_| join) {
            if let Err(e) = task.await {
                warn!(participant = %participant, error = %e, "Peer reactions ended abnormally");
            }
        }
        self.inner.sink.detach(participant).await;

        info!(participant = %participant, "Peer removed");
        self.inner.events.publish(VoiceEvent::PeerRemoved {
            participant: participant.clone(),
        });
        true
    }

    /// Handle one event for the handle at `epoch`. Returns `false` once the
    /// handle is gone and no further events matter.
    async fn react(&self, participant: &ParticipantId, epoch: u64, event: NegotiationEvent) -> bool {
        let input = match &event {
            NegotiationEvent::Signal(_) => PeerInput::SignalOut,
            NegotiationEvent::Stream(_) => PeerInput::StreamReady,
            NegotiationEvent::Connected => PeerInput::Connected,
            NegotiationEvent::Error(_) => PeerInput::Error,
            NegotiationEvent::Closed => PeerInput::Closed,
        };

        {
            let mut peers = self.inner.peers.write().await;
            let Some(handle) = peers.get_mut(participant).filter(|h| h.epoch == epoch) else {
                return false;
            };
            let Some(previous) = handle.apply(input) else {
                debug!(participant = %participant, ?input, "Event after close ignored");
                return false;
            };
            if let NegotiationEvent::Stream(stream) = &event {
                handle.stream = Some(Arc::clone(stream));
            }
            if previous != handle.state {
                self.emit_state(participant, handle.state);
            }
        }

        match event {
            NegotiationEvent::Signal(payload) => {
                if let Err(e) = self.inner.relay.publish(participant, &payload).await {
                    warn!(participant = %participant, error = %e, "Failed to relay signal");
                }
                true
            }
            NegotiationEvent::Stream(stream) => {
                info!(participant = %participant, stream = stream.id(), "Remote audio received");
                if let Err(e) = self.inner.sink.attach(participant.clone(), stream).await {
                    warn!(participant = %participant, error = %e, "Failed to play remote audio");
                } else if !self.is_current(participant, epoch).await {
                    // Removed while attaching.
                    self.inner.sink.detach(participant).await;
                }
                true
            }
            NegotiationEvent::Connected => {
                info!(participant = %participant, "Peer connected");
                true
            }
            NegotiationEvent::Error(e) => {
                warn!(participant = %participant, error = %e, "Peer connection failed");
                self.remove_handle(participant, Some(epoch), false).await;
                false
            }
            NegotiationEvent::Closed => {
                info!(participant = %participant, "Peer connection closed");
                self.remove_handle(participant, Some(epoch), false).await;
                false
            }
        }
    }
}

#[async_trait]
impl SignalHandler for PeerConnectionManager {
    async fn on_signal(&self, from: ParticipantId, payload: SignalPayload) {
        if let Err(e) = self.apply_remote_signal(&from, payload).await {
            warn!(participant = %from, error = %e, "Failed to apply remote signal");
        }
    }
}

/// Feed `payload` to the handle's negotiation object, or queue it while the
/// object is still being built.
fn deliver_signal(
    events: &EventBus<VoiceEvent>,
    participant: &ParticipantId,
    handle: &mut PeerHandle,
    payload: &SignalPayload,
) -> Result<(), NegotiationError> {
    let Some(negotiator) = handle.negotiator.as_ref() else {
        debug!(participant = %participant, "Peer not ready, signal queued");
        handle.queued.push(payload.clone());
        return Ok(());
    };
    if let Err(e) = negotiator.signal(payload) {
        warn!(participant = %participant, error = %e, "Signal rejected by peer");
        return Err(e);
    }
    if handle.apply(PeerInput::SignalIn).is_some_and(|previous| previous != handle.state) {
        events.publish(VoiceEvent::PeerStateChanged {
            participant: participant.clone(),
            state: handle.state,
        });
    }
    Ok(())
}

async fn run_reactions(
    manager: PeerConnectionManager,
    participant: ParticipantId,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<NegotiationEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            debug!(participant = %participant, "Negotiation events ended");
            manager.remove_handle(&participant, Some(epoch), false).await;
            break;
        };
        if !manager.react(&participant, epoch, event).await {
            break;
        }
    }
    debug!(participant = %participant, epoch, "Peer reactions stopped");
}
