//! In-process fakes for the platform seams.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meshvoice_common::{
    MailboxError, MediaError, NegotiationError, ParticipantId, PlaybackError,
};
use serde_json::json;
use tokio::sync::{mpsc, Notify, Semaphore};

use crate::media::{AudioConstraints, AudioTrack, CaptureDevice};
use crate::peer::{NegotiationEvent, Negotiator, NegotiatorFactory, NegotiatorOptions, NegotiatorParts};
use crate::playback::{InboundStream, Playback, PlaybackBackend};
use crate::protocol::{EntryId, MailboxEntry, MailboxField, SignalPayload, SignalingMessage};
use crate::signaling::{ChangeReceiver, MailboxStore, MemoryMailbox, SignalHandler};

/// Poll an async condition until it holds, failing after about two seconds.
macro_rules! wait_for {
    ($cond:expr) => {{
        let mut reached = false;
        for _ in 0..400 {
            if $cond {
                reached = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(reached, "timed out waiting for `{}`", stringify!($cond));
    }};
}
pub(crate) use wait_for;

pub(crate) fn offer() -> SignalPayload {
    SignalPayload::new(json!({"type": "offer", "sdp": "v=0 fake-offer"}))
}

pub(crate) fn answer() -> SignalPayload {
    SignalPayload::new(json!({"type": "answer", "sdp": "v=0 fake-answer"}))
}

pub(crate) fn candidate(n: u32) -> SignalPayload {
    SignalPayload::new(json!({"candidate": format!("candidate:{n}")}))
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct FakeTrack {
    id: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl AudioTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeDevice {
    failure: Option<MediaError>,
    calls: AtomicUsize,
    constraints: Mutex<Option<AudioConstraints>>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeDevice {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing(error: MediaError) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(error),
            ..Self::default()
        })
    }

    pub(crate) fn acquire_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_constraints(&self) -> Option<AudioConstraints> {
        *self.constraints.lock().unwrap()
    }

    /// Every track handed out so far.
    pub(crate) fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureDevice for FakeDevice {
    async fn acquire(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Vec<Arc<dyn AudioTrack>>, MediaError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.constraints.lock().unwrap() = Some(*constraints);
        tokio::task::yield_now().await;
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let track = Arc::new(FakeTrack {
            id: format!("mic-{n}"),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        });
        self.tracks.lock().unwrap().push(Arc::clone(&track));
        Ok(vec![track as Arc<dyn AudioTrack>])
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct FakeStream {
    id: String,
}

impl FakeStream {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: id.to_string() })
    }
}

impl InboundStream for FakeStream {
    fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) struct FakeOutput {
    stream_id: String,
    volume: f64,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl FakeOutput {
    pub(crate) fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub(crate) fn volume(&self) -> f64 {
        self.volume
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct FakePlayback {
    output: Arc<FakeOutput>,
    reject_autoplay: Arc<AtomicBool>,
}

impl Playback for FakePlayback {
    fn start(&mut self) -> Result<(), PlaybackError> {
        if self.reject_autoplay.load(Ordering::SeqCst) {
            return Err(PlaybackError::AutoplayRejected("user gesture required".into()));
        }
        self.output.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.output.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    fail: bool,
    reject_autoplay: Arc<AtomicBool>,
    outputs: Mutex<Vec<Arc<FakeOutput>>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn rejecting_autoplay() -> Arc<Self> {
        let backend = Self::default();
        backend.reject_autoplay.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub(crate) fn allow_autoplay(&self) {
        self.reject_autoplay.store(false, Ordering::SeqCst);
    }

    pub(crate) fn outputs(&self) -> Vec<Arc<FakeOutput>> {
        self.outputs.lock().unwrap().clone()
    }
}

impl PlaybackBackend for FakeBackend {
    fn open(
        &self,
        stream: Arc<dyn InboundStream>,
        volume: f64,
    ) -> Result<Box<dyn Playback>, PlaybackError> {
        if self.fail {
            return Err(PlaybackError::Backend("no output device".into()));
        }
        let output = Arc::new(FakeOutput {
            stream_id: stream.id().to_string(),
            volume,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });
        self.outputs.lock().unwrap().push(Arc::clone(&output));
        Ok(Box::new(FakePlayback {
            output,
            reject_autoplay: Arc::clone(&self.reject_autoplay),
        }))
    }
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// Shared view of one fake negotiation object.
pub(crate) struct FakePeer {
    pub(crate) remote: ParticipantId,
    pub(crate) initiator: bool,
    pub(crate) capture_id: String,
    handshake: bool,
    events: Mutex<Option<mpsc::UnboundedSender<NegotiationEvent>>>,
    received: Mutex<Vec<SignalPayload>>,
    destroyed: AtomicBool,
    reject_signals: AtomicBool,
}

impl FakePeer {
    /// Report an event as the platform would. Returns `false` once destroyed.
    pub(crate) fn emit(&self, event: NegotiationEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub(crate) fn received(&self) -> Vec<SignalPayload> {
        self.received.lock().unwrap().clone()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Drop the event channel without reporting a close.
    pub(crate) fn vanish(&self) {
        self.events.lock().unwrap().take();
    }

    pub(crate) fn reject_signals(&self) {
        self.reject_signals.store(true, Ordering::SeqCst);
    }

    fn stream_id(&self) -> String {
        format!("audio-from-{}", self.remote)
    }
}

struct FakeNegotiator(Arc<FakePeer>);

impl Negotiator for FakeNegotiator {
    fn signal(&self, payload: &SignalPayload) -> Result<(), NegotiationError> {
        let peer = &self.0;
        let malformed = payload.as_value()["type"] == "malformed";
        if malformed || peer.reject_signals.load(Ordering::SeqCst) {
            return Err(NegotiationError::SignalRejected("malformed payload".into()));
        }
        peer.received.lock().unwrap().push(payload.clone());
        if !peer.handshake {
            return Ok(());
        }
        match payload.as_value()["type"].as_str() {
            Some("offer") => {
                peer.emit(NegotiationEvent::Signal(answer()));
                peer.emit(NegotiationEvent::Connected);
                peer.emit(NegotiationEvent::Stream(FakeStream::new(&peer.stream_id())));
            }
            Some("answer") => {
                peer.emit(NegotiationEvent::Connected);
                peer.emit(NegotiationEvent::Stream(FakeStream::new(&peer.stream_id())));
            }
            _ => {}
        }
        Ok(())
    }

    fn destroy(&self) {
        self.0.destroyed.store(true, Ordering::SeqCst);
        self.0.emit(NegotiationEvent::Closed);
        self.0.events.lock().unwrap().take();
    }
}

#[derive(Default)]
pub(crate) struct FakeFactory {
    handshake: bool,
    fail: AtomicBool,
    /// One permit per released construction.
    gate: Option<Semaphore>,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeFactory {
    /// Initiators emit an offer on creation; offers and answers are
    /// answered and connected automatically.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            handshake: true,
            ..Self::default()
        })
    }

    /// Emits nothing on its own; tests drive events through [`FakePeer::emit`].
    pub(crate) fn manual() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Like `manual`, but each construction waits for [`release`](Self::release).
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Most recent negotiation object toward `remote`.
    pub(crate) fn peer(&self, remote: &str) -> Option<Arc<FakePeer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| p.remote.as_str() == remote)
            .cloned()
    }

    pub(crate) fn created(&self, remote: &str) -> usize {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.remote.as_str() == remote)
            .count()
    }
}

#[async_trait]
impl NegotiatorFactory for FakeFactory {
    async fn create(&self, options: NegotiatorOptions) -> Result<NegotiatorParts, NegotiationError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(NegotiationError::Construction("no peer connection support".into()));
        }

        let (tx, events) = mpsc::unbounded_channel();
        let peer = Arc::new(FakePeer {
            remote: options.remote.clone(),
            initiator: options.initiator,
            capture_id: options.capture.id().to_string(),
            handshake: self.handshake,
            events: Mutex::new(Some(tx)),
            received: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            reject_signals: AtomicBool::new(false),
        });
        if self.handshake && options.initiator {
            peer.emit(NegotiationEvent::Signal(offer()));
        }
        self.peers.lock().unwrap().push(Arc::clone(&peer));

        Ok(NegotiatorParts {
            negotiator: Box::new(FakeNegotiator(peer)),
            events,
        })
    }
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// Memory mailbox with switchable failures.
#[derive(Default)]
pub(crate) struct FlakyMailbox {
    pub(crate) inner: MemoryMailbox,
    pub(crate) fail_appends: AtomicBool,
    pub(crate) fail_queries: AtomicBool,
    pub(crate) fail_deletes: AtomicBool,
}

impl FlakyMailbox {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl MailboxStore for FlakyMailbox {
    async fn append(&self, message: SignalingMessage) -> Result<EntryId, MailboxError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(MailboxError::Unavailable("write rejected".into()));
        }
        self.inner.append(message).await
    }

    async fn watch(&self, field: MailboxField, value: &str) -> Result<ChangeReceiver, MailboxError> {
        self.inner.watch(field, value).await
    }

    async fn query(
        &self,
        field: MailboxField,
        value: &str,
    ) -> Result<Vec<MailboxEntry>, MailboxError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(MailboxError::Unavailable("query rejected".into()));
        }
        self.inner.query(field, value).await
    }

    async fn delete(&self, id: &str) -> Result<(), MailboxError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(MailboxError::Unavailable("delete rejected".into()));
        }
        self.inner.delete(id).await
    }
}

/// Memory mailbox whose appends can be held until [`open`](Self::open).
#[derive(Default)]
pub(crate) struct GatedMailbox {
    pub(crate) inner: MemoryMailbox,
    held: AtomicBool,
    waiting: AtomicUsize,
    gate: Notify,
}

impl GatedMailbox {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn hold_appends(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Appends currently blocked on the gate.
    pub(crate) fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn open(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_one();
    }
}

#[async_trait]
impl MailboxStore for GatedMailbox {
    async fn append(&self, message: SignalingMessage) -> Result<EntryId, MailboxError> {
        if self.held.load(Ordering::SeqCst) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.append(message).await
    }

    async fn watch(&self, field: MailboxField, value: &str) -> Result<ChangeReceiver, MailboxError> {
        self.inner.watch(field, value).await
    }

    async fn query(
        &self,
        field: MailboxField,
        value: &str,
    ) -> Result<Vec<MailboxEntry>, MailboxError> {
        self.inner.query(field, value).await
    }

    async fn delete(&self, id: &str) -> Result<(), MailboxError> {
        self.inner.delete(id).await
    }
}

/// Records every delivered payload.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    received: Mutex<Vec<(ParticipantId, SignalPayload)>>,
}

impl RecordingHandler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn received(&self) -> Vec<(ParticipantId, SignalPayload)> {
        self.received.lock().unwrap().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl SignalHandler for RecordingHandler {
    async fn on_signal(&self, from: ParticipantId, payload: SignalPayload) {
        self.received.lock().unwrap().push((from, payload));
    }
}
