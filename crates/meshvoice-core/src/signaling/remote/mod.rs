//! Mailbox client for a `meshvoice-mailbox` server over a WebSocket.

mod client;
mod connection;
mod types;

pub use client::WsMailbox;
pub use types::{ClientFrame, ServerFrame, WsMailboxConfig};
