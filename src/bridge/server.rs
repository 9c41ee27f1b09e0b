//! Bridge server module
//!
//! HTTP server that receives log requests from other processes and forwards
//! them through a channel to a single pump task that writes them to the sink.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Router,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{channel_level, BridgeMessage};
use crate::logging::LogWriter;

/// Default number of messages queued before new ones are dropped
pub const DEFAULT_CHANNEL_BUFFER: usize = 1024;

/// Receiver half of the bridge channel
pub type BridgeReceiver = mpsc::Receiver<BridgeMessage>;

/// Sender half of the bridge channel
///
/// Never blocks: when the queue is full the message is dropped and counted.
#[derive(Clone)]
pub struct BridgeSender {
    tx: mpsc::Sender<BridgeMessage>,
    dropped: Arc<AtomicU64>,
    /// Set while consecutive sends are being dropped
    overflowing: Arc<AtomicBool>,
}

impl BridgeSender {
    /// Queue a message
    ///
    /// Returns `false` if it was dropped or the pump has stopped.
    pub fn send(&self, message: BridgeMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.overflowing.store(false, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.overflowing.swap(true, Ordering::Relaxed) {
                    warn!(dropped_total = total, "Bridge channel full, dropping log messages");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Messages dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the receiving side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to control the running server
pub struct ServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    addr: SocketAddr,
}

impl ServerHandle {
    /// Get the address the server is listening on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shutdown the server gracefully
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            // Ignore error if receiver is already dropped
            let _ = tx.send(());
        }
    }
}

/// Create a bounded channel for bridge messages
pub fn create_channel(buffer: usize) -> (BridgeSender, BridgeReceiver) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let sender = BridgeSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        overflowing: Arc::new(AtomicBool::new(false)),
    };
    (sender, rx)
}

/// Drain the channel into a writer, in arrival order
///
/// Ends when every sender has been dropped.
pub fn spawn_pump(mut receiver: BridgeReceiver, writer: Arc<dyn LogWriter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            writer.write_record(message.into_record());
        }
        debug!("Bridge pump stopped");
    })
}

/// Build the bridge routes
pub fn router(sender: BridgeSender) -> Router {
    Router::new()
        .route("/emit/:channel", post(emit_handler))
        .with_state(sender)
}

/// Start the bridge server on loopback
///
/// Port 0 lets the OS pick a free port; see [`ServerHandle::addr`].
pub async fn start(port: u16, sender: BridgeSender) -> Result<ServerHandle> {
    let app = router(sender);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind log bridge on {}", addr))?;
    let bound_addr = listener.local_addr()?;

    info!("Log bridge listening on {}", bound_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                info!("Log bridge shutting down");
            })
            .await
            .ok();
    });

    Ok(ServerHandle {
        shutdown_tx: Some(shutdown_tx),
        addr: bound_addr,
    })
}

/// POST /emit/{channel} handler
///
/// Accepts the message without waiting for it to be written.
async fn emit_handler(
    Path(channel): Path<String>,
    State(sender): State<BridgeSender>,
    body: Bytes,
) -> StatusCode {
    let Some(level) = channel_level(&channel) else {
        return StatusCode::NOT_FOUND;
    };

    let message = BridgeMessage::from_payload(level, &body);
    if sender.send(message) || !sender.is_closed() {
        // A full queue drops the message but still answers 202
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
