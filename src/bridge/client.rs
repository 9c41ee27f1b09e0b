//! Bridge client
//!
//! Used by processes that do not own the log files. [`BridgeClient`] performs
//! one request per message; [`RemoteLogger`] queues messages and sends them in
//! order from a background task, so callers never wait on the network.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{channel_name, BridgeMessage};
use crate::logging::{LogLevel, Metadata};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends log requests to a bridge server
#[derive(Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    /// Create a client for the bridge listening on `addr`
    pub fn new(addr: SocketAddr) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            // Loopback only; system proxies must not see log traffic
            .no_proxy()
            .build()
            .context("Failed to build bridge HTTP client")?;
        Ok(Self {
            http,
            base_url: format!("http://{}", addr),
        })
    }

    /// URL of the endpoint for a level's channel
    pub fn channel_url(&self, level: LogLevel) -> String {
        format!("{}/emit/{}", self.base_url, channel_name(level))
    }

    /// Send one message and wait for the server to accept it
    pub async fn send(&self, message: &BridgeMessage) -> Result<()> {
        self.http
            .post(self.channel_url(message.level))
            .json(&message.to_payload())
            .send()
            .await
            .context("Failed to reach log bridge")?
            .error_for_status()
            .context("Log bridge rejected message")?;
        Ok(())
    }
}

/// Fire-and-forget logger for a remote process
///
/// Messages are sent one at a time in call order. Failures are dropped.
pub struct RemoteLogger {
    queue: mpsc::UnboundedSender<BridgeMessage>,
    worker: JoinHandle<()>,
}

impl RemoteLogger {
    /// Start the background sender; must be called inside a tokio runtime
    pub fn spawn(client: BridgeClient) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<BridgeMessage>();
        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let _ = client.send(&message).await;
            }
        });
        Self { queue, worker }
    }

    /// Queue a message at a level
    pub fn log(&self, level: LogLevel, message: impl Into<String>, metadata: Metadata) {
        let _ = self.queue.send(BridgeMessage::new(level, message, metadata));
    }

    pub fn debug(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(LogLevel::Debug, message, metadata);
    }

    pub fn info(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(LogLevel::Info, message, metadata);
    }

    pub fn warn(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(LogLevel::Warn, message, metadata);
    }

    pub fn error(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(LogLevel::Error, message, metadata);
    }

    /// Stop accepting messages and wait until the queued ones are sent
    pub async fn flush(self) {
        drop(self.queue);
        let _ = self.worker.await;
    }
}
