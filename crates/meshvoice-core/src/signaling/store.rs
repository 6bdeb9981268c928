use async_trait::async_trait;
use meshvoice_common::MailboxError;
use tokio::sync::mpsc;

use crate::protocol::{EntryId, MailboxChange, MailboxEntry, MailboxField, SignalingMessage};

/// Live stream of changes from a [`MailboxStore::watch`].
pub type ChangeReceiver = mpsc::UnboundedReceiver<MailboxChange>;

/// A room-scoped shared mailbox.
///
/// Dropping a [`ChangeReceiver`] ends its watch.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// Store a message and return the id assigned to it.
    async fn append(&self, message: SignalingMessage) -> Result<EntryId, MailboxError>;

    /// Watch entries whose `field` equals `value`. Entries already present
    /// are reported first as `Added`, followed by live changes.
    async fn watch(&self, field: MailboxField, value: &str) -> Result<ChangeReceiver, MailboxError>;

    async fn query(&self, field: MailboxField, value: &str)
        -> Result<Vec<MailboxEntry>, MailboxError>;

    /// Delete an entry. Deleting an id that is already gone succeeds.
    async fn delete(&self, id: &str) -> Result<(), MailboxError>;
}
