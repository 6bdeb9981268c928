//! Binds room membership to the voice mesh.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use meshvoice_common::{EventBus, MediaError, ParticipantId};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::types::{PresenceNotification, RoomParticipant, SessionConfig, SessionStatus, VoiceEvent};
use crate::media::{CaptureDevice, LocalMediaController};
use crate::peer::{NegotiatorFactory, PeerConnectionManager};
use crate::playback::{AudioOutputSink, PlaybackBackend};
use crate::signaling::{MailboxStore, SignalHandler, SignalingRelay};

#[derive(Default)]
struct SessionFlags {
    active: bool,
    connecting: bool,
    last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Voice Session
// ---------------------------------------------------------------------------

/// One participant's voice session in one room.
///
/// Starting the session acquires the microphone, subscribes to inbound
/// signals and connects to every current member. Presence changes then add
/// and remove peers until [`stop_session`](Self::stop_session).
pub struct VoiceSession {
    local_id: ParticipantId,
    media: Arc<LocalMediaController>,
    relay: Arc<SignalingRelay>,
    sink: Arc<AudioOutputSink>,
    peers: PeerConnectionManager,
    events: EventBus<VoiceEvent>,
    flags: RwLock<SessionFlags>,
    /// Serializes start, stop and membership changes.
    lifecycle: Mutex<()>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        device: Arc<dyn CaptureDevice>,
        factory: Arc<dyn NegotiatorFactory>,
        store: Arc<dyn MailboxStore>,
        playback: Arc<dyn PlaybackBackend>,
    ) -> Self {
        let events = EventBus::new(256);
        let media = Arc::new(LocalMediaController::new(device, config.constraints));
        let relay = Arc::new(SignalingRelay::new(config.local_id.clone(), store));
        let sink = Arc::new(AudioOutputSink::new(playback, config.volume));
        let peers = PeerConnectionManager::new(
            config.local_id.clone(),
            factory,
            Arc::clone(&media),
            Arc::clone(&relay),
            Arc::clone(&sink),
            config.ice,
            events.clone(),
        );

        Self {
            local_id: config.local_id,
            media,
            relay,
            sink,
            peers,
            events,
            flags: RwLock::new(SessionFlags::default()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn media(&self) -> &LocalMediaController {
        &self.media
    }

    pub fn relay(&self) -> &SignalingRelay {
        &self.relay
    }

    pub fn sink(&self) -> &AudioOutputSink {
        &self.sink
    }

    pub fn peers(&self) -> &PeerConnectionManager {
        &self.peers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    /// Start voice with the room's current members.
    ///
    /// Fails only when the microphone cannot be acquired, in which case no
    /// subscription or peer exists afterwards. Returns the number of peers
    /// created.
    pub async fn start_session(&self, members: &[RoomParticipant]) -> Result<usize, MediaError> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut flags = self.flags.write().await;
            flags.connecting = true;
            flags.last_error = None;
        }
        info!(participant = %self.local_id, members = members.len(), "Starting voice session");

        if let Err(e) = self.media.acquire().await {
            error!(error = %e, "Voice session aborted, microphone unavailable");
            {
                let mut flags = self.flags.write().await;
                flags.connecting = false;
                flags.last_error = Some(e.to_string());
            }
            self.events.publish(VoiceEvent::Error(e.to_string()));
            return Err(e);
        }

        let handler: Arc<dyn SignalHandler> = Arc::new(self.peers.clone());
        if let Err(e) = self.relay.subscribe(handler).await {
            warn!(error = %e, "Signal subscription failed");
            self.record_error(e.to_string()).await;
        }

        let created = self.connect_to(members).await;
        {
            let mut flags = self.flags.write().await;
            flags.active = true;
            flags.connecting = false;
        }
        info!(peers = created, "Voice session started");
        self.events.publish(VoiceEvent::SessionStarted { peers: created });
        Ok(created)
    }

    /// Leave voice. Safe to call at any time, including when never started.
    pub async fn stop_session(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        self.relay.unsubscribe().await;
        let removed = self.peers.remove_all().await;
        self.sink.detach_all().await;
        self.media.release().await;
        let purged = self.relay.purge_own_messages().await;

        let was_active = std::mem::take(&mut *self.flags.write().await).active;
        if was_active {
            info!(removed, purged, "Voice session stopped");
            self.events.publish(VoiceEvent::SessionStopped);
        } else {
            debug!(removed, purged, "Voice session cleanup without active session");
        }
    }

    pub async fn on_participant_joined(&self, participant: &RoomParticipant) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.media.is_held().await {
            debug!(participant = %participant.id, "Join ignored, voice not active");
            return;
        }
        self.connect_to(std::slice::from_ref(participant)).await;
    }

    pub async fn on_participant_left(&self, participant: &ParticipantId) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.peers.remove(participant).await {
            info!(participant = %participant, "Participant left, peer closed");
        }
    }

    pub async fn handle_presence(&self, notification: PresenceNotification) {
        match notification {
            PresenceNotification::Joined(participant) => {
                self.on_participant_joined(&participant).await;
            }
            PresenceNotification::Left(participant) => {
                self.on_participant_left(&participant).await;
            }
            PresenceNotification::Snapshot(members) => self.reconcile(&members).await,
        }
    }

    pub async fn set_muted(&self, muted: bool) -> bool {
        let applied = self.media.set_muted(muted).await;
        if applied {
            self.events.publish(VoiceEvent::MuteChanged { muted });
        }
        applied
    }

    pub async fn toggle_mute(&self) -> Option<bool> {
        let muted = self.media.toggle_mute().await?;
        self.events.publish(VoiceEvent::MuteChanged { muted });
        Some(muted)
    }

    /// Retry remote outputs the platform refused to autoplay.
    pub async fn resume_playback(&self) -> usize {
        self.sink.resume_pending().await
    }

    pub async fn status(&self) -> SessionStatus {
        let (active, connecting, last_error) = {
            let flags = self.flags.read().await;
            (flags.active, flags.connecting, flags.last_error.clone())
        };
        SessionStatus {
            active,
            connecting,
            muted: self.media.is_muted().await,
            connected_peers: self.peers.connected_count().await,
            last_error,
        }
    }

    // -- Internals ----------------------------------------------------------

    /// Ensure a peer toward each member, building them concurrently.
    /// Failures are isolated per member.
    async fn connect_to(&self, members: &[RoomParticipant]) -> usize {
        let attempts = members
            .iter()
            .filter(|m| m.id != self.local_id)
            .map(|member| async move { (member, self.peers.ensure_peer(&member.id, None).await) });

        let mut created = 0;
        for (member, result) in join_all(attempts).await {
            match result {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(participant = %member.id, error = %e, "Failed to connect to participant");
                    self.record_error(e.to_string()).await;
                }
            }
        }
        created
    }

    /// Drop peers no longer present and connect to new members.
    async fn reconcile(&self, members: &[RoomParticipant]) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.media.is_held().await {
            return;
        }
        let present: HashSet<&ParticipantId> = members.iter().map(|m| &m.id).collect();
        for id in self.peers.peer_ids().await {
            if !present.contains(&id) {
                self.peers.remove(&id).await;
            }
        }
        let created = self.connect_to(members).await;
        debug!(members = members.len(), created, "Membership reconciled");
    }

    async fn record_error(&self, message: String) {
        self.flags.write().await.last_error = Some(message.clone());
        self.events.publish(VoiceEvent::Error(message));
    }
}
