//! Mailbox server for meshvoice signaling.
//!
//! Holds one in-memory mailbox per room scope. Clients append addressed
//! negotiation payloads, watch the entries addressed to them and delete
//! what they consume. Nothing is persisted; stale entries are reaped.

mod connection;
mod rooms;

use std::time::Duration;

use clap::Parser;
use rooms::RoomStore;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshvoice-mailbox", about = "Signaling mailbox for meshvoice rooms")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8090)]
    port: u16,

    /// Seconds an unconsumed signal is kept before it is reaped
    #[arg(long, default_value_t = 120)]
    entry_ttl: u64,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("meshvoice_mailbox=info")),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Mailbox server listening on {addr}");

    let store = RoomStore::new();

    // Reaper for signals nobody consumed (peer left mid-negotiation).
    let reaper_store = store.clone();
    let ttl = Duration::from_secs(args.entry_ttl);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let reaped = reaper_store.reap_stale(ttl).await;
            if reaped > 0 {
                let rooms = reaper_store.count().await;
                tracing::info!(reaped, rooms, "Reaper pass");
            }
        }
    });

    serve(listener, store).await;
    Ok(())
}

/// Accept WebSocket clients until the listener fails.
async fn serve(listener: TcpListener, store: RoomStore) {
    while let Ok((stream, addr)) = listener.accept().await {
        let store = store.clone();
        tokio::spawn(async move {
            match accept_async(stream).await {
                Ok(ws) => {
                    tracing::info!(%addr, "New connection");
                    connection::handle_connection(ws, addr, store).await;
                }
                Err(e) => {
                    tracing::warn!(%addr, error = %e, "WebSocket handshake failed");
                }
            }
        });
    }
}
