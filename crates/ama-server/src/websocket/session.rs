//! Room session: one subscriber from upgrade through disconnect.
//!
//! Lifecycle once the socket is upgraded:
//! 1. Register the connection under its room and keep the cancel signal
//! 2. Spawn the writer (outbound queue + heartbeat pings)
//! 3. Block until the signal fires, the client goes away, or the writer stops
//! 4. Unregister, close the handle, let the writer send its Close frame

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ama_core::RoomId;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientId, ConnectionHandle};
use super::registry::SubscriberRegistry;

/// How long the writer gets to flush its Close frame during teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Floor for the ping period; `tokio::time::interval` panics on zero.
const MIN_PING_PERIOD: Duration = Duration::from_millis(100);

/// Per-session knobs, taken from server settings.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub outbound_queue: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl SessionConfig {
    /// Outbound queue capacity, never zero.
    pub fn queue_capacity(&self) -> usize {
        self.outbound_queue.max(1)
    }

    /// Time between pings, never below `MIN_PING_PERIOD`.
    pub fn ping_period(&self) -> Duration {
        self.heartbeat_interval.max(MIN_PING_PERIOD)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 64,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// What ended a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The cancel signal fired (failed delivery or server shutdown).
    Cancelled,
    /// The client sent a Close frame or the stream ended.
    ClientClosed,
    /// Reading from the socket failed.
    TransportError,
    /// The writer stopped on a write error or heartbeat timeout.
    WriterStopped,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::WriterStopped => "writer_stopped",
        }
    }
}

/// Run a room session to completion. Returns once the subscriber has been
/// unregistered.
#[instrument(skip_all, fields(room_id = %room_id, client_id = %client_id))]
pub async fn run_room_session(
    socket: WebSocket,
    room_id: RoomId,
    client_id: ClientId,
    remote_addr: Option<SocketAddr>,
    registry: Arc<SubscriberRegistry>,
    config: SessionConfig,
) -> EndReason {
    let (ws_tx, ws_rx) = socket.split();
    let (send_tx, send_rx) = mpsc::channel::<Utf8Bytes>(config.queue_capacity());
    let connection = Arc::new(ConnectionHandle::new(client_id, remote_addr, send_tx));

    let cancel = registry.register(&room_id, connection.clone());
    info!(client_ip = ?remote_addr, "new client connected");

    let mut writer = tokio::spawn(write_loop(ws_tx, send_rx, connection.clone(), config));

    let reason = tokio::select! {
        () = cancel.wait() => EndReason::Cancelled,
        reason = read_loop(ws_rx, &connection) => reason,
        _ = &mut writer => EndReason::WriterStopped,
    };

    // Fire the signal so anything still holding a snapshot sees the session as gone.
    cancel.trigger();
    let removed = registry.unregister(&room_id, connection.id(), &cancel);
    connection.close();

    if reason != EndReason::WriterStopped
        && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err()
    {
        debug!("writer did not finish in time, aborting");
        writer.abort();
    }

    info!(
        reason = reason.as_str(),
        removed,
        dropped = connection.drop_count(),
        duration_secs = connection.age().as_secs_f64(),
        "client disconnected"
    );
    reason
}

/// Drain inbound frames until the client leaves. Subscribers have nothing
/// to say, so every frame only counts as liveness.
async fn read_loop(mut ws_rx: SplitStream<WebSocket>, connection: &ConnectionHandle) -> EndReason {
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Close(_)) => {
                debug!("client sent close frame");
                return EndReason::ClientClosed;
            }
            Ok(_) => connection.mark_alive(),
            Err(e) => {
                debug!(error = %e, "websocket read failed");
                return EndReason::TransportError;
            }
        }
    }
    EndReason::ClientClosed
}

/// Forward queued frames to the socket and keep the connection alive with
/// pings. Sends a Close frame when the handle is closed.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Utf8Bytes>,
    connection: Arc<ConnectionHandle>,
    config: SessionConfig,
) {
    let mut ping_interval = tokio::time::interval(config.ping_period());
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            () = connection.closed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            frame = send_rx.recv() => {
                let Some(text) = frame else { break };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if connection.idle() > config.heartbeat_timeout {
                    warn!("client unresponsive for {:?}, disconnecting", config.heartbeat_timeout);
                    break;
                }
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
