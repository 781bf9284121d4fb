// src/platforms/mod.rs - Adapter lifecycle, error taxonomy, and shared plumbing

use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::chat::status::StatusBoard;
use crate::types::{CanonicalMessage, ChatEvent, ConnectionState, Platform};

pub mod kick;
pub mod twitch;
pub mod youtube;

/// How long a reader task gets to close its socket before it is aborted
const GRACEFUL_STOP: Duration = Duration::from_secs(1);

pub(crate) type ChatSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// HTTP client whose requests give up after `limit`
pub fn http_client(limit: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(limit)
        .timeout(limit)
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
            reqwest::Client::new()
        })
}

/// WebSocket handshake bounded by `limit`
pub(crate) async fn open_socket(url: &str, limit: Duration) -> Result<ChatSocket, AdapterError> {
    match timeout(limit, connect_async(url)).await {
        Ok(result) => Ok(result?.0),
        Err(_) => Err(AdapterError::Transport(format!(
            "no handshake from {} within {:?}",
            url, limit
        ))),
    }
}

/// Failures an adapter can hit. Lookup failures happen before any socket or
/// timer exists; transport failures end the session; parse failures only
/// drop the offending unit.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for AdapterError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AdapterError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        AdapterError::Parse(e.to_string())
    }
}

/// Trait defining the lifecycle every chat transport implements
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform this adapter reads from
    fn platform(&self) -> Platform;

    /// Run the setup sequence and spawn the reader task. Returns once the
    /// transport is open; the Connected state follows asynchronously.
    async fn connect(&mut self, link: AdapterLink) -> Result<(), AdapterError>;

    /// Stop the reader task and release the transport. Safe to call repeatedly.
    async fn disconnect(&mut self);

    /// Whether a reader task is currently running
    fn is_running(&self) -> bool;
}

/// Everything an adapter uses to talk back to the supervisor: the presenter
/// channel and the status board.
#[derive(Clone)]
pub struct AdapterLink {
    platform: Platform,
    events: mpsc::Sender<ChatEvent>,
    status: StatusBoard,
}

impl AdapterLink {
    pub fn new(platform: Platform, events: mpsc::Sender<ChatEvent>, status: StatusBoard) -> Self {
        Self {
            platform,
            events,
            status,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Hand a message to the presenter. Returns false once the presenter is gone.
    pub async fn emit(&self, message: CanonicalMessage) -> bool {
        self.send(ChatEvent::Message(message)).await
    }

    pub async fn emit_system(&self, text: impl Into<String>, color: &str) -> bool {
        self.emit(CanonicalMessage::system(self.platform, text, color)).await
    }

    pub async fn send(&self, event: ChatEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub async fn set_status(&self, state: ConnectionState) {
        self.status.set(self.platform, state).await;
    }

    pub async fn status(&self) -> ConnectionState {
        self.status.get(self.platform).await
    }
}

/// Reader task plus the signal that asks it to stop
#[derive(Default)]
pub(crate) struct TaskSlot {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<broadcast::Sender<()>>,
}

impl TaskSlot {
    /// Create the shutdown channel for a task about to be spawned
    pub(crate) fn arm(&mut self) -> broadcast::Receiver<()> {
        let (tx, rx) = broadcast::channel(1);
        self.shutdown = Some(tx);
        rx
    }

    pub(crate) fn attach(&mut self, handle: JoinHandle<()>) {
        self.handle = Some(handle);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal, wait briefly, then abort. Once this returns the task is gone.
    pub(crate) async fn stop(&mut self, platform: Platform) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        if let Some(mut handle) = self.handle.take() {
            if timeout(GRACEFUL_STOP, &mut handle).await.is_err() {
                debug!("{} reader did not stop in time, aborting", platform);
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}
