//! Per-connection handling: one client socket, any number of rooms.

use std::collections::HashMap;
use std::net::SocketAddr;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use meshvoice_common::MailboxError;
use meshvoice_core::signaling::remote::{ClientFrame, ServerFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::rooms::RoomStore;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Live watches of one connection, keyed by the id handed to the client.
#[derive(Default)]
struct Watches {
    next_id: u64,
    forwarders: HashMap<u64, JoinHandle<()>>,
}

impl Watches {
    fn stop(&mut self, id: u64) -> bool {
        match self.forwarders.remove(&id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn stop_all(&mut self) {
        for (_, task) in self.forwarders.drain() {
            task.abort();
        }
    }
}

/// Serve one WebSocket client until it disconnects.
pub async fn handle_connection(ws: WebSocketStream<TcpStream>, addr: SocketAddr, store: RoomStore) {
    let (mut sink, mut stream) = ws.split();

    // Replies and watch changes share one outbound queue so frames are
    // written by this task only.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut watches = Watches::default();

    loop {
        tokio::select! {
            Some(frame) = out_rx.recv() => {
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => {
                                handle_frame(frame, &store, &out_tx, &mut watches).await;
                            }
                            Err(e) => {
                                tracing::warn!(%addr, error = %e, "Invalid frame");
                                let _ = out_tx.send(ServerFrame::Error {
                                    req: None,
                                    message: format!("invalid frame: {e}"),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%addr, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let open = watches.forwarders.len();
    watches.stop_all();
    tracing::info!(%addr, watches = open, "Connection closed");
}

async fn handle_frame(
    frame: ClientFrame,
    store: &RoomStore,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
    watches: &mut Watches,
) {
    let req = frame.req();
    let reply = match frame {
        ClientFrame::Append { room, message, .. } => store
            .append(&room, message)
            .await
            .map(|id| ServerFrame::Ok { req, id: Some(id) }),
        ClientFrame::Delete { room, id, .. } => store
            .delete(&room, &id)
            .await
            .map(|()| ServerFrame::Ok { req, id: None }),
        ClientFrame::Query {
            room, field, value, ..
        } => store
            .query(&room, field, &value)
            .await
            .map(|entries| ServerFrame::Entries { req, entries }),
        ClientFrame::Watch {
            room, field, value, ..
        } => match store.watch(&room, field, &value).await {
            Ok(mut changes) => {
                watches.next_id += 1;
                let watch = watches.next_id;
                // Confirm before the forwarder starts so the client sees
                // `Watching` ahead of the first change.
                let _ = out_tx.send(ServerFrame::Watching { req, watch });
                let tx = out_tx.clone();
                let task = tokio::spawn(async move {
                    while let Some(change) = changes.recv().await {
                        let frame = ServerFrame::Change {
                            watch,
                            kind: change.kind,
                            entry: change.entry,
                        };
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                });
                watches.forwarders.insert(watch, task);
                tracing::debug!(%room, %value, watch, "Watch opened");
                return;
            }
            Err(e) => Err(e),
        },
        ClientFrame::Unwatch { watch, .. } => {
            if watches.stop(watch) {
                Ok(ServerFrame::Ok { req, id: None })
            } else {
                Err(MailboxError::NotFound(format!("watch {watch}")))
            }
        }
    };

    let frame = reply.unwrap_or_else(|e| ServerFrame::Error {
        req: Some(req),
        message: e.to_string(),
    });
    let _ = out_tx.send(frame);
}

async fn send_frame(
    sink: &mut WsSink,
    frame: &ServerFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode frame");
            Ok(())
        }
    }
}
