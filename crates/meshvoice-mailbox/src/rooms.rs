//! Room store: one in-memory mailbox per room scope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meshvoice_common::MailboxError;
use meshvoice_core::protocol::now_millis;
use meshvoice_core::signaling::ChangeReceiver;
use meshvoice_core::{EntryId, MailboxEntry, MailboxField, MailboxStore, MemoryMailbox, SignalingMessage};
use tokio::sync::{RwLock, RwLockReadGuard};

type Rooms = HashMap<String, MemoryMailbox>;

/// Thread-safe room store. Rooms are created on first use and dropped by
/// the reaper once empty and unwatched.
#[derive(Clone, Default)]
pub struct RoomStore {
    rooms: Arc<RwLock<Rooms>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mailbox for `scope`, with the room map read-locked so the reaper
    /// cannot drop the room while the caller uses it.
    async fn open(&self, scope: &str) -> (RwLockReadGuard<'_, Rooms>, MemoryMailbox) {
        loop {
            let rooms = self.rooms.read().await;
            let found = rooms.get(scope).cloned();
            if let Some(mailbox) = found {
                return (rooms, mailbox);
            }
            drop(rooms);
            self.rooms
                .write()
                .await
                .entry(scope.to_string())
                .or_default();
        }
    }

    pub async fn append(&self, scope: &str, message: SignalingMessage) -> Result<EntryId, MailboxError> {
        let (_rooms, mailbox) = self.open(scope).await;
        mailbox.append(message).await
    }

    pub async fn delete(&self, scope: &str, id: &str) -> Result<(), MailboxError> {
        let (_rooms, mailbox) = self.open(scope).await;
        mailbox.delete(id).await
    }

    pub async fn query(
        &self,
        scope: &str,
        field: MailboxField,
        value: &str,
    ) -> Result<Vec<MailboxEntry>, MailboxError> {
        let (_rooms, mailbox) = self.open(scope).await;
        mailbox.query(field, value).await
    }

    pub async fn watch(
        &self,
        scope: &str,
        field: MailboxField,
        value: &str,
    ) -> Result<ChangeReceiver, MailboxError> {
        let (_rooms, mailbox) = self.open(scope).await;
        mailbox.watch(field, value).await
    }

    /// Delete entries older than `max_age` and drop idle rooms.
    /// Returns the number of entries deleted.
    pub async fn reap_stale(&self, max_age: Duration) -> usize {
        let cutoff = now_millis().saturating_sub(max_age.as_millis() as u64);
        let mut rooms = self.rooms.write().await;
        let mut reaped = 0;
        let mut idle = Vec::new();
        for (scope, mailbox) in rooms.iter() {
            let purged = mailbox.purge_older_than(cutoff).await;
            if purged > 0 {
                tracing::info!(room = %scope, entries = purged, "Reaping stale signals");
                reaped += purged;
            }
            if mailbox.is_empty().await && mailbox.watcher_count().await == 0 {
                idle.push(scope.clone());
            }
        }
        for scope in idle {
            rooms.remove(&scope);
        }
        reaped
    }

    /// Number of live rooms.
    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
