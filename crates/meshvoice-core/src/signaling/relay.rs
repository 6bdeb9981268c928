//! Publishes outgoing payloads and consumes payloads addressed to us.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use meshvoice_common::{ParticipantId, SignalingError};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{ChangeReceiver, MailboxStore};
use crate::protocol::{
    ChangeKind, EntryId, MailboxEntry, MailboxField, SignalPayload, SignalingMessage,
};

/// Receives payloads addressed to the local participant, in mailbox order.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn on_signal(&self, from: ParticipantId, payload: SignalPayload);
}

struct Subscription {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Signaling relay bound to one participant in one room's mailbox.
pub struct SignalingRelay {
    local_id: ParticipantId,
    store: Arc<dyn MailboxStore>,
    subscription: Mutex<Option<Subscription>>,
}

impl SignalingRelay {
    pub fn new(local_id: ParticipantId, store: Arc<dyn MailboxStore>) -> Self {
        Self {
            local_id,
            store,
            subscription: Mutex::new(None),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Write one payload addressed to `to`.
    pub async fn publish(
        &self,
        to: &ParticipantId,
        payload: &SignalPayload,
    ) -> Result<EntryId, SignalingError> {
        let message = SignalingMessage::new(self.local_id.clone(), to.clone(), payload);
        let id = self
            .store
            .append(message)
            .await
            .map_err(SignalingError::PublishFailed)?;
        debug!(to = %to, entry = %id, "Signal published");
        Ok(id)
    }

    /// Start delivering payloads addressed to the local participant.
    ///
    /// Each added entry is handed to `handler` and then deleted. Calling this
    /// while a consumer is running keeps the existing subscription; one whose
    /// watch has ended is replaced.
    pub async fn subscribe(&self, handler: Arc<dyn SignalHandler>) -> Result<(), SignalingError> {
        let mut subscription = self.subscription.lock().await;
        match subscription.as_ref() {
            Some(current) if !current.task.is_finished() => {
                debug!(participant = %self.local_id, "Already subscribed to signals");
                return Ok(());
            }
            Some(_) => {
                info!(participant = %self.local_id, "Previous signal watch ended, resubscribing");
                *subscription = None;
            }
            None => {}
        }

        let changes = self
            .store
            .watch(MailboxField::To, self.local_id.as_str())
            .await
            .map_err(SignalingError::Subscribe)?;
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(consume_signals(
            changes,
            stop_rx,
            Arc::clone(&self.store),
            handler,
        ));
        *subscription = Some(Subscription { stop_tx, task });

        info!(participant = %self.local_id, "Subscribed to signals");
        Ok(())
    }

    /// Stop delivery. Returns once the consumer has finished; no payload is
    /// delivered after this resolves.
    pub async fn unsubscribe(&self) {
        let Some(Subscription { stop_tx, task }) = self.subscription.lock().await.take() else {
            return;
        };
        let _ = stop_tx.send(());
        if let Err(e) = task.await {
            warn!(error = %e, "Signal consumer ended abnormally");
        }
        info!(participant = %self.local_id, "Unsubscribed from signals");
    }

    /// Whether a consumer is running. Turns false if the store ends the
    /// watch on its own.
    pub async fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Delete every entry sent by or addressed to the local participant.
    /// Returns the number deleted; individual failures are logged and skipped.
    pub async fn purge_own_messages(&self) -> usize {
        let mut ids = BTreeSet::new();
        for field in [MailboxField::From, MailboxField::To] {
            match self.store.query(field, self.local_id.as_str()).await {
                Ok(entries) => ids.extend(entries.into_iter().map(|e| e.id)),
                Err(e) => warn!(?field, error = %e, "Failed to query own signals"),
            }
        }

        let mut deleted = 0;
        for id in ids {
            match self.store.delete(&id).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(entry = %id, error = %e, "Failed to delete signal"),
            }
        }
        if deleted > 0 {
            info!(participant = %self.local_id, deleted, "Purged own signals");
        }
        deleted
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

async fn consume_signals(
    mut changes: ChangeReceiver,
    mut stop_rx: oneshot::Receiver<()>,
    store: Arc<dyn MailboxStore>,
    handler: Arc<dyn SignalHandler>,
) {
    loop {
        let change = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            change = changes.recv() => match change {
                Some(change) => change,
                None => {
                    warn!("Signal watch ended");
                    break;
                }
            },
        };
        if change.kind != ChangeKind::Added {
            continue;
        }

        let MailboxEntry { id, message } = change.entry;
        match message.payload() {
            Ok(payload) => {
                debug!(from = %message.from, entry = %id, "Signal received");
                handler.on_signal(message.from, payload).await;
            }
            Err(e) => warn!(entry = %id, error = %e, "Dropping unparseable signal"),
        }
        if let Err(e) = store.delete(&id).await {
            warn!(entry = %id, error = %e, "Failed to delete consumed signal");
        }
    }
}
