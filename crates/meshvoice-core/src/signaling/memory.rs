//! In-process mailbox, used by the mailbox server and in tests.

use std::sync::Arc;

use async_trait::async_trait;
use meshvoice_common::{new_id, MailboxError};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::store::{ChangeReceiver, MailboxStore};
use crate::protocol::{
    ChangeKind, EntryId, MailboxChange, MailboxEntry, MailboxField, SignalingMessage,
};

struct Watcher {
    field: MailboxField,
    value: String,
    tx: mpsc::UnboundedSender<MailboxChange>,
}

#[derive(Default)]
struct MemoryState {
    /// Entries in insertion order.
    entries: Vec<MailboxEntry>,
    watchers: Vec<Watcher>,
}

impl MemoryState {
    fn notify(&mut self, kind: ChangeKind, entry: &MailboxEntry) {
        self.watchers.retain(|w| {
            if !w.field.matches(&entry.message, &w.value) {
                return !w.tx.is_closed();
            }
            w.tx
                .send(MailboxChange {
                    kind,
                    entry: entry.clone(),
                })
                .is_ok()
        });
    }
}

/// Mailbox held entirely in memory. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn entries(&self) -> Vec<MailboxEntry> {
        self.state.read().await.entries.clone()
    }

    /// Number of watches whose receiver is still alive.
    pub async fn watcher_count(&self) -> usize {
        let mut state = self.state.write().await;
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }

    /// Replace the message stored under `id`, reporting `Modified`.
    pub async fn update(&self, id: &str, message: SignalingMessage) -> Result<(), MailboxError> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| MailboxError::NotFound(id.to_string()))?;
        entry.message = message;
        let entry = entry.clone();
        state.notify(ChangeKind::Modified, &entry);
        Ok(())
    }

    /// Delete entries created before `cutoff_millis`. Returns the count.
    pub async fn purge_older_than(&self, cutoff_millis: u64) -> usize {
        let mut state = self.state.write().await;
        let (stale, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.entries)
            .into_iter()
            .partition(|e| e.message.created_at < cutoff_millis);
        state.entries = kept;
        for entry in &stale {
            state.notify(ChangeKind::Removed, entry);
        }
        stale.len()
    }
}

#[async_trait]
impl MailboxStore for MemoryMailbox {
    async fn append(&self, message: SignalingMessage) -> Result<EntryId, MailboxError> {
        let entry = MailboxEntry {
            id: new_id(),
            message,
        };
        let mut state = self.state.write().await;
        state.entries.push(entry.clone());
        state.notify(ChangeKind::Added, &entry);
        debug!(entry = %entry.id, to = %entry.message.to, "Mailbox entry appended");
        Ok(entry.id)
    }

    async fn watch(&self, field: MailboxField, value: &str) -> Result<ChangeReceiver, MailboxError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        // Snapshot and registration happen under one lock, so no entry is
        // missed or reported twice.
        for entry in state.entries.iter().filter(|e| field.matches(&e.message, value)) {
            let _ = tx.send(MailboxChange {
                kind: ChangeKind::Added,
                entry: entry.clone(),
            });
        }
        state.watchers.push(Watcher {
            field,
            value: value.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn query(
        &self,
        field: MailboxField,
        value: &str,
    ) -> Result<Vec<MailboxEntry>, MailboxError> {
        Ok(self
            .state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| field.matches(&e.message, value))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), MailboxError> {
        let mut state = self.state.write().await;
        if let Some(pos) = state.entries.iter().position(|e| e.id == id) {
            let entry = state.entries.remove(pos);
            state.notify(ChangeKind::Removed, &entry);
        }
        Ok(())
    }
}
