pub mod registry;
pub mod wire;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::arb::ArbitrageDetector;
use crate::config::StreamConfig;
use crate::store::PriceStore;
use registry::SubscriptionRegistry;
use wire::{ControlMessage, ServerMessage};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    /// Retry attempts exhausted; terminal until `connect()` is called again.
    Failed,
    Closed,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out")]
    Timeout,

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("closed by server")]
    ClosedByServer,

    #[error("stream ended unexpectedly")]
    StreamEnded,
}

/// Handles the connection task dispatches into.
#[derive(Clone)]
pub struct StreamShared {
    pub state: Arc<RwLock<ConnState>>,
    pub registry: Arc<RwLock<SubscriptionRegistry>>,
    pub store: Arc<RwLock<PriceStore>>,
    pub detector: Arc<ArbitrageDetector>,
    /// Malformed frames dropped since startup.
    pub dropped_frames: Arc<AtomicU64>,
    /// Last server-reported or terminal connection error.
    pub last_error: Arc<RwLock<Option<String>>>,
}

struct StreamHandle {
    cmd_tx: mpsc::UnboundedSender<ControlMessage>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the socket lifecycle: bounded fixed-interval reconnection, full
/// subscription resync on every open, and dispatch of inbound frames.
pub struct ConnectionManager {
    url: String,
    cfg: StreamConfig,
    shared: StreamShared,
    handle: Mutex<Option<StreamHandle>>,
}

impl ConnectionManager {
    pub fn new(url: String, cfg: StreamConfig, shared: StreamShared) -> Self {
        Self {
            url,
            cfg,
            shared,
            handle: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> ConnState {
        *self.shared.state.read().await
    }

    /// Start the connection task. No-op while Connecting or Open; from
    /// Reconnecting the pending backoff is cancelled and a fresh attempt
    /// starts immediately; from Failed/Closed/Idle the retry counter resets.
    pub async fn connect(&self) {
        let mut handle = self.handle.lock().await;
        let state = *self.shared.state.read().await;
        if matches!(state, ConnState::Connecting | ConnState::Open) {
            debug!("connect() ignored, stream already {:?}", state);
            return;
        }

        if let Some(old) = handle.take() {
            old.task.abort();
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shared.state.write().await = ConnState::Connecting;

        let task = tokio::spawn(run_loop(
            self.url.clone(),
            self.cfg.clone(),
            self.shared.clone(),
            cmd_rx,
            shutdown_rx,
        ));

        *handle = Some(StreamHandle {
            cmd_tx,
            shutdown_tx,
            task,
        });
    }

    /// Tear the connection down from any state: close the socket, cancel
    /// pending reconnect timers, and transition to Closed. No late callback
    /// can touch the stores after this returns.
    pub async fn disconnect(&self) {
        let mut handle = self.handle.lock().await;
        if let Some(h) = handle.take() {
            let _ = h.shutdown_tx.send(true);
            h.task.abort();
        }
        *self.shared.state.write().await = ConnState::Closed;
        info!("Stream disconnected");
    }

    /// Queue a control message for the socket writer if the stream is Open.
    pub async fn send_if_open(&self, msg: ControlMessage) {
        if *self.shared.state.read().await != ConnState::Open {
            return;
        }
        let handle = self.handle.lock().await;
        if let Some(h) = handle.as_ref() {
            let _ = h.cmd_tx.send(msg);
        }
    }
}

async fn run_loop(
    url: String,
    cfg: StreamConfig,
    shared: StreamShared,
    mut cmd_rx: mpsc::UnboundedReceiver<ControlMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        *shared.state.write().await = ConnState::Connecting;

        let result = tokio::select! {
            res = try_connect(&url, cfg.connect_timeout) => res,
            _ = shutdown_rx.changed() => {
                *shared.state.write().await = ConnState::Closed;
                return;
            }
        };

        match result {
            Ok(ws) => {
                attempts = 0;
                info!("Stream connected to {}", url);
                *shared.state.write().await = ConnState::Open;

                match session(ws, &shared, &mut cmd_rx, &mut shutdown_rx).await {
                    SessionEnd::Shutdown => {
                        *shared.state.write().await = ConnState::Closed;
                        return;
                    }
                    SessionEnd::Dropped(err) => {
                        warn!("Stream session dropped: {}", err);
                    }
                }
            }
            Err(err) => {
                warn!("Stream connect failed: {}", err);
            }
        }

        attempts += 1;
        if attempts > cfg.max_reconnect_attempts {
            error!(
                "Giving up after {} reconnect attempts; call connect() to retry",
                cfg.max_reconnect_attempts
            );
            *shared.last_error.write().await =
                Some("reconnect attempts exhausted".to_string());
            *shared.state.write().await = ConnState::Failed;
            return;
        }

        *shared.state.write().await = ConnState::Reconnecting;
        warn!(
            "Reconnecting stream in {:?} (attempt {}/{})",
            cfg.reconnect_interval, attempts, cfg.max_reconnect_attempts
        );
        tokio::select! {
            _ = tokio::time::sleep(cfg.reconnect_interval) => {}
            _ = shutdown_rx.changed() => {
                *shared.state.write().await = ConnState::Closed;
                return;
            }
        }
    }
}

async fn try_connect(
    url: &str,
    connect_timeout: Duration,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, ConnectionError> {
    match tokio::time::timeout(connect_timeout, connect_async(url)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(ConnectionError::Connect(e.to_string())),
        Err(_) => Err(ConnectionError::Timeout),
    }
}

enum SessionEnd {
    Shutdown,
    Dropped(ConnectionError),
}

async fn session(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    shared: &StreamShared,
    cmd_rx: &mut mpsc::UnboundedReceiver<ControlMessage>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();

    // Every transition into Open retransmits the entire accumulated set,
    // never a delta, so the server's view converges after downtime.
    let resync = shared.registry.read().await.resync_message();
    if let Some(msg) = resync {
        info!(
            "Resyncing subscriptions: {} symbols, {} exchanges",
            msg.symbols.len(),
            msg.exchanges.len()
        );
        if let Ok(text) = serde_json::to_string(&msg) {
            if let Err(e) = write.send(Message::Text(text.into())).await {
                return SessionEnd::Dropped(ConnectionError::WebSocket(e.to_string()));
            }
        }
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(&text, shared).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        return SessionEnd::Dropped(ConnectionError::ClosedByServer);
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Dropped(ConnectionError::WebSocket(e.to_string()));
                    }
                    None => {
                        return SessionEnd::Dropped(ConnectionError::StreamEnded);
                    }
                    _ => {}
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                if let Ok(text) = serde_json::to_string(&cmd) {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return SessionEnd::Dropped(ConnectionError::WebSocket(e.to_string()));
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

/// Single dispatch point for inbound frames. Malformed frames are logged,
/// counted, and dropped; one bad frame never disrupts the stream.
pub(crate) async fn dispatch_frame(text: &str, shared: &StreamShared) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping malformed stream frame: {}", e);
            return;
        }
    };

    match msg {
        m @ ServerMessage::Price { .. } => match m.into_quote() {
            Some(quote) => {
                shared.store.write().await.put(quote);
            }
            None => {
                shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping price frame with invalid bid/ask");
            }
        },
        m @ ServerMessage::Arbitrage { .. } => {
            if let Some(alert) = m.into_alert() {
                shared.detector.ingest(alert).await;
            }
        }
        ServerMessage::Subscribed { symbols, exchanges } => {
            debug!("Server ack: subscribed {:?} on {:?}", symbols, exchanges);
        }
        ServerMessage::Unsubscribed { symbols, exchanges } => {
            debug!("Server ack: unsubscribed {:?} on {:?}", symbols, exchanges);
        }
        ServerMessage::Error { message } => {
            warn!("Stream server error: {}", message);
            *shared.last_error.write().await = Some(message);
        }
    }
}
