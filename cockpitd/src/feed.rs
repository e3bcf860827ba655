//! Live feed client.
//!
//! One connection at a time, typed events on an mpsc channel, a fixed delay
//! between attempts and cancellation through a `CancellationToken`.
//!
//! States: `Connecting → Open → Closed → Connecting`, or
//! `Connecting → Error → Closed → Connecting` when the connect attempt fails.

use cockpit::protocol::{parse_feed_message, FeedMessage, OutboundMessage};
use futures_util::future::{self, BoxFuture};
use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("WebSocket not connected")]
    NotConnected,
    #[error("outbound queue is full")]
    Backpressure,
    #[error("feed client has shut down")]
    Closed,
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Connecting,
    Open,
    Closed,
    Error,
}

impl FeedState {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedState::Connecting => "connecting",
            FeedState::Open => "open",
            FeedState::Closed => "closed",
            FeedState::Error => "error",
        }
    }
}

#[derive(Debug)]
pub enum FeedEvent {
    /// Connection state change with a human-readable status line.
    Status { state: FeedState, message: String },
    Message(FeedMessage),
    /// A frame that did not parse. The connection stays up.
    Malformed { error: String },
}

// ═══════════════════════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════════════════════

pub type OutgoingSink = Pin<Box<dyn Sink<String, Error = FeedError> + Send>>;

/// An open connection: text frames in, text frames out.
pub struct FeedConnection {
    pub incoming: BoxStream<'static, Result<String, FeedError>>,
    pub outgoing: OutgoingSink,
}

pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<FeedConnection, FeedError>>;
}

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<FeedConnection, FeedError>> {
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| FeedError::Connect(e.to_string()))?;
            let (write, read) = ws.split();

            let incoming = read
                .filter_map(|frame| async move {
                    match frame {
                        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_string())),
                        Ok(_) => None,
                        Err(e) => Some(Err(FeedError::Transport(e.to_string()))),
                    }
                })
                .boxed();
            let outgoing = write
                .sink_map_err(|e| FeedError::Transport(e.to_string()))
                .with(|text: String| future::ok::<_, FeedError>(Message::text(text)));

            Ok(FeedConnection {
                incoming,
                outgoing: Box::pin(outgoing),
            })
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════════

pub struct FeedHandle {
    cancel: CancellationToken,
    outbound: mpsc::Sender<String>,
    state: watch::Receiver<FeedState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedHandle {
    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    /// Queue a message on the open connection.
    pub fn send(&self, message: &OutboundMessage) -> Result<(), FeedError> {
        if self.state() != FeedState::Open {
            return Err(FeedError::NotConnected);
        }
        let text = message.to_text()?;
        self.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => FeedError::Backpressure,
            TrySendError::Closed(_) => FeedError::Closed,
        })
    }

    /// Stop the loop (including a pending retry delay) and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Feed task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start the feed loop. Events arrive on the returned receiver until shutdown.
pub fn spawn<C: Connector>(
    connector: C,
    retry_delay: Duration,
) -> (FeedHandle, mpsc::Receiver<FeedEvent>) {
    let (events_tx, events_rx) = mpsc::channel(256);
    let (outbound_tx, outbound_rx) = mpsc::channel(32);
    let (state_tx, state_rx) = watch::channel(FeedState::Connecting);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run(
        connector,
        retry_delay,
        Channels {
            events: events_tx,
            outbound: outbound_rx,
            state: state_tx,
        },
        cancel.clone(),
    ));

    let handle = FeedHandle {
        cancel,
        outbound: outbound_tx,
        state: state_rx,
        task: Mutex::new(Some(task)),
    };
    (handle, events_rx)
}

struct Channels {
    events: mpsc::Sender<FeedEvent>,
    outbound: mpsc::Receiver<String>,
    state: watch::Sender<FeedState>,
}

impl Channels {
    /// Returns `false` once nobody listens for events.
    async fn announce(&self, state: FeedState, message: String) -> bool {
        self.state.send_replace(state);
        self.events
            .send(FeedEvent::Status { state, message })
            .await
            .is_ok()
    }
}

enum SessionEnd {
    Disconnected,
    Cancelled,
    ConsumerGone,
}

async fn run<C: Connector>(
    connector: C,
    retry_delay: Duration,
    mut ch: Channels,
    cancel: CancellationToken,
) {
    let retry_status = format!(
        "Disconnected. Retrying in {}s...",
        retry_delay.as_secs_f64().round()
    );

    'outer: loop {
        if !ch
            .announce(FeedState::Connecting, "Connecting...".to_string())
            .await
        {
            break;
        }

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            r = connector.connect() => r,
        };

        match attempt {
            Ok(conn) => {
                info!("Feed connected");
                if !ch
                    .announce(FeedState::Open, "Connected to live feed".to_string())
                    .await
                {
                    break;
                }
                match session(conn, &mut ch, &cancel).await {
                    SessionEnd::Disconnected => {}
                    SessionEnd::Cancelled | SessionEnd::ConsumerGone => break 'outer,
                }
                let mut dropped = 0usize;
                while ch.outbound.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    warn!("Dropped {} outbound message(s) queued at disconnect", dropped);
                }
                warn!("Feed disconnected, reconnecting in {:?}", retry_delay);
            }
            Err(e) => {
                warn!("Feed connection failed: {}, retrying in {:?}", e, retry_delay);
                if !ch
                    .announce(FeedState::Error, format!("Connection error: {e}"))
                    .await
                {
                    break;
                }
            }
        }

        if !ch.announce(FeedState::Closed, retry_status.clone()).await {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }

    ch.state.send_replace(FeedState::Closed);
    debug!("Feed loop stopped");
}

async fn session(
    conn: FeedConnection,
    ch: &mut Channels,
    cancel: &CancellationToken,
) -> SessionEnd {
    let FeedConnection {
        mut incoming,
        mut outgoing,
    } = conn;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = outgoing.close().await {
                    debug!("Feed close: {}", e);
                }
                return SessionEnd::Cancelled;
            }
            frame = incoming.next() => match frame {
                Some(Ok(text)) => {
                    let event = match parse_feed_message(&text) {
                        Ok(message) => FeedEvent::Message(message),
                        Err(e) => {
                            warn!("Dropping malformed feed message: {}", e);
                            FeedEvent::Malformed { error: e.to_string() }
                        }
                    };
                    if ch.events.send(event).await.is_err() {
                        return SessionEnd::ConsumerGone;
                    }
                }
                Some(Err(e)) => {
                    warn!("Feed transport error: {}", e);
                    return SessionEnd::Disconnected;
                }
                None => return SessionEnd::Disconnected,
            },
            Some(text) = ch.outbound.recv() => {
                if let Err(e) = outgoing.send(text).await {
                    warn!("Feed send failed: {}", e);
                    return SessionEnd::Disconnected;
                }
            }
        }
    }
}
