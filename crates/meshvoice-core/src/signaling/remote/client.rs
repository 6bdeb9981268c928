//! Public handle for a remote mailbox room.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshvoice_common::MailboxError;
use tokio::sync::{mpsc, oneshot, RwLock};

use super::connection::{connection_loop, next_req, Command};
use super::types::{ClientFrame, ServerFrame, WsMailboxConfig};
use crate::protocol::{EntryId, MailboxEntry, MailboxField, SignalingMessage};
use crate::signaling::store::{ChangeReceiver, MailboxStore};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Mailbox for one room on a remote server.
///
/// Requests are forwarded to a background connection task that reconnects
/// with backoff and re-establishes live watches after each reconnect.
/// Requests issued while disconnected fail with `MailboxError::Disconnected`.
#[derive(Clone)]
pub struct WsMailbox {
    command_tx: mpsc::Sender<Command>,
    connected: Arc<RwLock<bool>>,
    room: String,
    request_timeout: Duration,
}

impl WsMailbox {
    /// Start the background connection. Must be called within a tokio runtime.
    pub fn connect(config: WsMailboxConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let connected = Arc::new(RwLock::new(false));
        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
            room: config.room.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        };

        tokio::spawn(connection_loop(config, connected, command_rx));

        client
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(Command::Disconnect).await;
    }

    async fn request(&self, frame: ClientFrame) -> Result<ServerFrame, MailboxError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Request { frame, reply })
            .await
            .map_err(|_| MailboxError::Disconnected)?;
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MailboxError::Disconnected),
            Err(_) => Err(MailboxError::Unavailable("request timed out".into())),
        }
    }
}

fn unexpected(frame: ServerFrame) -> MailboxError {
    MailboxError::Protocol(format!("unexpected reply: {frame:?}"))
}

#[async_trait]
impl MailboxStore for WsMailbox {
    async fn append(&self, message: SignalingMessage) -> Result<EntryId, MailboxError> {
        let frame = ClientFrame::Append {
            req: next_req(),
            room: self.room.clone(),
            message,
        };
        match self.request(frame).await? {
            ServerFrame::Ok { id: Some(id), .. } => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    async fn watch(&self, field: MailboxField, value: &str) -> Result<ChangeReceiver, MailboxError> {
        let (changes, rx) = mpsc::unbounded_channel();
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Watch {
                room: self.room.clone(),
                field,
                value: value.to_string(),
                changes,
                reply,
            })
            .await
            .map_err(|_| MailboxError::Disconnected)?;
        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result.map(|()| rx),
            Ok(Err(_)) => Err(MailboxError::Disconnected),
            Err(_) => Err(MailboxError::Unavailable("watch timed out".into())),
        }
    }

    async fn query(
        &self,
        field: MailboxField,
        value: &str,
    ) -> Result<Vec<MailboxEntry>, MailboxError> {
        let frame = ClientFrame::Query {
            req: next_req(),
            room: self.room.clone(),
            field,
            value: value.to_string(),
        };
        match self.request(frame).await? {
            ServerFrame::Entries { entries, .. } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), MailboxError> {
        let frame = ClientFrame::Delete {
            req: next_req(),
            room: self.room.clone(),
            id: id.to_string(),
        };
        match self.request(frame).await? {
            ServerFrame::Ok { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
