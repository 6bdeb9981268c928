//! Audio output sink: at most one playback per remote participant.

use std::collections::HashMap;
use std::sync::Arc;

use meshvoice_common::{ParticipantId, PlaybackError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{InboundStream, Playback, PlaybackBackend};

struct Attachment {
    stream: Arc<dyn InboundStream>,
    output: Box<dyn Playback>,
    started: bool,
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Binds each remote participant's inbound stream to an audible output.
pub struct AudioOutputSink {
    backend: Arc<dyn PlaybackBackend>,
    volume: f64,
    attachments: RwLock<HashMap<ParticipantId, Attachment>>,
}

impl AudioOutputSink {
    pub fn new(backend: Arc<dyn PlaybackBackend>, volume: f64) -> Self {
        Self {
            backend,
            volume: volume.clamp(0.0, 1.0),
            attachments: RwLock::new(HashMap::new()),
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Play `stream` for `participant`, replacing any existing output.
    ///
    /// An autoplay rejection keeps the attachment in place; the output can
    /// be started later with [`resume_pending`](Self::resume_pending).
    pub async fn attach(
        &self,
        participant: ParticipantId,
        stream: Arc<dyn InboundStream>,
    ) -> Result<(), PlaybackError> {
        let mut attachments = self.attachments.write().await;
        if let Some(mut previous) = attachments.remove(&participant) {
            previous.output.stop();
            debug!(
                participant = %participant,
                stream = previous.stream.id(),
                "Replaced existing playback"
            );
        }

        let mut output = self.backend.open(Arc::clone(&stream), self.volume)?;
        let started = match output.start() {
            Ok(()) => true,
            Err(PlaybackError::AutoplayRejected(reason)) => {
                warn!(participant = %participant, %reason, "Autoplay rejected, playback deferred");
                false
            }
            Err(e) => {
                output.stop();
                return Err(e);
            }
        };

        info!(participant = %participant, stream = stream.id(), started, "Playback attached");
        attachments.insert(
            participant,
            Attachment {
                stream,
                output,
                started,
            },
        );
        Ok(())
    }

    /// Stop and drop the output for `participant`. Returns whether one existed.
    pub async fn detach(&self, participant: &ParticipantId) -> bool {
        let removed = self.attachments.write().await.remove(participant);
        match removed {
            Some(mut attachment) => {
                attachment.output.stop();
                debug!(participant = %participant, "Playback detached");
                true
            }
            None => false,
        }
    }

    pub async fn detach_all(&self) -> usize {
        let drained: Vec<_> = self.attachments.write().await.drain().collect();
        let count = drained.len();
        for (_, mut attachment) in drained {
            attachment.output.stop();
        }
        if count > 0 {
            info!(count, "All playback detached");
        }
        count
    }

    /// Retry outputs whose start was rejected. Returns how many now play.
    pub async fn resume_pending(&self) -> usize {
        let mut attachments = self.attachments.write().await;
        let mut resumed = 0;
        for (participant, attachment) in attachments.iter_mut().filter(|(_, a)| !a.started) {
            match attachment.output.start() {
                Ok(()) => {
                    attachment.started = true;
                    resumed += 1;
                }
                Err(e) => debug!(participant = %participant, error = %e, "Playback still blocked"),
            }
        }
        resumed
    }

    pub async fn is_attached(&self, participant: &ParticipantId) -> bool {
        self.attachments.read().await.contains_key(participant)
    }

    pub async fn is_playing(&self, participant: &ParticipantId) -> bool {
        self.attachments
            .read()
            .await
            .get(participant)
            .is_some_and(|a| a.started)
    }

    /// Id of the stream currently bound to `participant`.
    pub async fn attached_stream(&self, participant: &ParticipantId) -> Option<String> {
        self.attachments
            .read()
            .await
            .get(participant)
            .map(|a| a.stream.id().to_string())
    }

    pub async fn len(&self) -> usize {
        self.attachments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.attachments.read().await.is_empty()
    }
}
