//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meshvoice_common::MailboxError;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::types::{ClientFrame, ServerFrame, WsMailboxConfig};
use crate::protocol::{MailboxChange, MailboxField};

// ---------------------------------------------------------------------------
// Request Counter
// ---------------------------------------------------------------------------

/// Monotonically increasing id for requests and local watch keys.
static REQ_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_req() -> u64 {
    REQ_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) enum Command {
    Request {
        frame: ClientFrame,
        reply: oneshot::Sender<Result<ServerFrame, MailboxError>>,
    },
    Watch {
        room: String,
        field: MailboxField,
        value: String,
        changes: mpsc::UnboundedSender<MailboxChange>,
        reply: oneshot::Sender<Result<(), MailboxError>>,
    },
    Disconnect,
}

/// A watch that must be (re)established on every connection.
struct WatchSpec {
    room: String,
    field: MailboxField,
    value: String,
    changes: mpsc::UnboundedSender<MailboxChange>,
}

impl WatchSpec {
    fn frame(&self, req: u64) -> ClientFrame {
        ClientFrame::Watch {
            req,
            room: self.room.clone(),
            field: self.field,
            value: self.value.clone(),
        }
    }
}

enum Pending {
    Reply(oneshot::Sender<Result<ServerFrame, MailboxError>>),
    Watch {
        key: u64,
        reply: Option<oneshot::Sender<Result<(), MailboxError>>>,
    },
}

enum Exit {
    Reconnect,
    Shutdown,
}

type Watches = HashMap<u64, WatchSpec>;

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

pub(crate) async fn connection_loop(
    config: WsMailboxConfig,
    connected: Arc<RwLock<bool>>,
    mut command_rx: mpsc::Receiver<Command>,
) {
    let mut watches: Watches = HashMap::new();
    let mut reconnect_delay = config.reconnect_delay_secs;

    loop {
        info!(url = %config.url, room = %config.room, "Connecting to mailbox");

        match tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            tokio_tungstenite::connect_async(config.url.as_str()),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                info!(watches = watches.len(), "Mailbox connected");

                let exit = serve(ws_stream, &config, &mut command_rx, &mut watches).await;

                *connected.write().await = false;
                if let Exit::Shutdown = exit {
                    info!("Mailbox connection closed");
                    return;
                }
                warn!("Mailbox connection lost");
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to mailbox");
            }
            Err(_elapsed) => {
                error!(
                    timeout = config.connect_timeout_secs,
                    "Mailbox connection timed out"
                );
            }
        }

        // Exponential backoff reconnect.
        info!(
            delay = reconnect_delay,
            "Reconnecting in {} seconds", reconnect_delay
        );
        let delay = Duration::from_secs(reconnect_delay);
        if let Exit::Shutdown = idle(delay, &mut command_rx, &mut watches).await {
            return;
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }
}

/// Wait out the backoff. Requests fail fast; watches are kept for the next
/// connection.
async fn idle(delay: Duration, command_rx: &mut mpsc::Receiver<Command>, watches: &mut Watches) -> Exit {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Exit::Reconnect,
            cmd = command_rx.recv() => match cmd {
                None | Some(Command::Disconnect) => return Exit::Shutdown,
                Some(Command::Request { reply, .. }) => {
                    let _ = reply.send(Err(MailboxError::Disconnected));
                }
                Some(Command::Watch { room, field, value, changes, reply }) => {
                    watches.insert(next_req(), WatchSpec { room, field, value, changes });
                    let _ = reply.send(Ok(()));
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Connected
// ---------------------------------------------------------------------------

async fn serve(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &WsMailboxConfig,
    command_rx: &mut mpsc::Receiver<Command>,
    watches: &mut Watches,
) -> Exit {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    // Server watch id -> local watch key.
    let mut server_watches: HashMap<u64, u64> = HashMap::new();

    // Re-establish live watches nobody has stopped listening to.
    let dropped = prune_closed(watches);
    if dropped > 0 {
        debug!(dropped, "Dropped abandoned watches");
    }
    for (key, spec) in watches.iter() {
        let req = next_req();
        if send_frame(&mut ws_write, &spec.frame(req)).await.is_err() {
            return Exit::Reconnect;
        }
        pending.insert(req, Pending::Watch { key: *key, reply: None });
    }

    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(config.heartbeat_interval_secs.max(1)));
    heartbeat.tick().await;

    let exit = loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                None | Some(Command::Disconnect) => {
                    let _ = ws_write.send(WsMessage::Close(None)).await;
                    break Exit::Shutdown;
                }
                Some(Command::Request { frame, reply }) => {
                    let req = frame.req();
                    if let Err(e) = send_frame(&mut ws_write, &frame).await {
                        warn!(error = %e, "Failed to send mailbox request");
                        let _ = reply.send(Err(MailboxError::Disconnected));
                        break Exit::Reconnect;
                    }
                    pending.insert(req, Pending::Reply(reply));
                }
                Some(Command::Watch { room, field, value, changes, reply }) => {
                    let key = next_req();
                    let spec = WatchSpec { room, field, value, changes };
                    let req = next_req();
                    let frame = spec.frame(req);
                    watches.insert(key, spec);
                    pending.insert(req, Pending::Watch { key, reply: Some(reply) });
                    if send_frame(&mut ws_write, &frame).await.is_err() {
                        break Exit::Reconnect;
                    }
                }
            },
            msg = ws_read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(frame) => {
                        if let Some(watch) = dispatch(frame, &mut pending, &mut server_watches, watches) {
                            let unwatch = ClientFrame::Unwatch { req: next_req(), watch };
                            let _ = send_frame(&mut ws_write, &unwatch).await;
                        }
                    }
                    Err(_) => debug!(text = %text, "Unrecognized message from mailbox"),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = ws_write.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Mailbox server closed connection");
                    break Exit::Reconnect;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Mailbox WebSocket error");
                    break Exit::Reconnect;
                }
                Some(Ok(_)) => {}
            },
            _ = heartbeat.tick() => {
                if ws_write.send(WsMessage::Ping(Default::default())).await.is_err() {
                    break Exit::Reconnect;
                }
            }
        }
    };

    // Outstanding requests cannot be answered any more. Unconfirmed watches
    // stay registered and are retried on the next connection.
    for (_, entry) in pending.drain() {
        match entry {
            Pending::Reply(reply) => {
                let _ = reply.send(Err(MailboxError::Disconnected));
            }
            Pending::Watch { reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
        }
    }
    exit
}

/// Forget watches whose receiver is gone. Returns how many were removed.
fn prune_closed(watches: &mut Watches) -> usize {
    let before = watches.len();
    watches.retain(|_, spec| !spec.changes.is_closed());
    before - watches.len()
}

/// Route one server frame. Returns a server watch id that should be
/// cancelled because nobody listens to it any more.
fn dispatch(
    frame: ServerFrame,
    pending: &mut HashMap<u64, Pending>,
    server_watches: &mut HashMap<u64, u64>,
    watches: &mut Watches,
) -> Option<u64> {
    match frame {
        ServerFrame::Change { watch, kind, entry } => {
            let key = *server_watches.get(&watch)?;
            let delivered = watches
                .get(&key)
                .is_some_and(|spec| spec.changes.send(MailboxChange { kind, entry }).is_ok());
            if delivered {
                return None;
            }
            debug!(watch, "Watch receiver dropped");
            watches.remove(&key);
            server_watches.remove(&watch);
            Some(watch)
        }
        ServerFrame::Watching { req, watch } => match pending.remove(&req) {
            Some(Pending::Watch { key, reply }) => {
                if !watches.contains_key(&key) {
                    return Some(watch);
                }
                server_watches.insert(watch, key);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                None
            }
            Some(Pending::Reply(reply)) => {
                let _ = reply.send(Ok(ServerFrame::Watching { req, watch }));
                None
            }
            None => Some(watch),
        },
        ServerFrame::Error {
            req: Some(req),
            message,
        } => {
            match pending.remove(&req) {
                Some(Pending::Reply(reply)) => {
                    let _ = reply.send(Err(MailboxError::Protocol(message)));
                }
                Some(Pending::Watch { key, reply }) => {
                    warn!(%message, "Mailbox rejected watch");
                    watches.remove(&key);
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(MailboxError::Protocol(message)));
                    }
                }
                None => debug!(req, %message, "Error for unknown request"),
            }
            None
        }
        ServerFrame::Error { req: None, message } => {
            warn!(%message, "Mailbox server error");
            None
        }
        other => {
            let req = other.req()?;
            if let Some(Pending::Reply(reply)) = pending.remove(&req) {
                let _ = reply.send(Ok(other));
            }
            None
        }
    }
}

async fn send_frame<S>(ws_write: &mut S, frame: &ClientFrame) -> Result<(), MailboxError>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(frame).map_err(|e| MailboxError::Protocol(e.to_string()))?;
    ws_write
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|e| MailboxError::Unavailable(e.to_string()))
}
