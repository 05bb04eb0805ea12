//! Connection handlers for the Tableau server.
//!
//! Every WebSocket runs its own task that decodes frames and forwards calls
//! to a single dispatcher task. The dispatcher owns all application state
//! changes; connection tasks only move frames in and out.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tableau_core::{AppContext, ConnectionId, Dispatcher, Inbound};
use tableau_protocol::frames::codes;
use tableau_protocol::{codec, Frame, ProtocolError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Application state, read only outside the dispatcher.
    pub ctx: Arc<AppContext>,
    /// Inbound queue of the dispatcher task.
    pub dispatch_tx: mpsc::Sender<Inbound>,
    active: AtomicUsize,
}

impl AppState {
    /// Create the application and spawn its dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: Config) -> Arc<Self> {
        let ctx = AppContext::new(config.app_config());
        let (dispatch_tx, rx) = mpsc::channel(config.limits.dispatch_queue.max(1));
        tokio::spawn(dispatch_loop(Dispatcher::new(Arc::clone(&ctx)), rx));

        Arc::new(Self {
            config,
            ctx,
            dispatch_tx,
            active: AtomicUsize::new(0),
        })
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// Holds one connection slot until dropped.
struct ConnectionSlot {
    state: Arc<AppState>,
    _metrics: ConnectionMetricsGuard,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Self {
        state.active.fetch_add(1, Ordering::Relaxed);
        Self {
            state: Arc::clone(state),
            _metrics: ConnectionMetricsGuard::new(),
        }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Consume the inbound queue, one message at a time.
async fn dispatch_loop(dispatcher: Dispatcher, mut rx: mpsc::Receiver<Inbound>) {
    while let Some(inbound) = rx.recv().await {
        let label = match &inbound {
            Inbound::Call { op, .. } if !dispatcher.context().bridge().is_registered(op) => {
                "unknown".to_string()
            }
            other => other.label(),
        };
        let start = Instant::now();
        if !dispatcher.process(inbound) {
            metrics::record_error("handler_panic");
        }
        metrics::record_dispatch(label, start.elapsed().as_secs_f64());
        metrics::set_app_stats(&dispatcher.context().stats());
    }
    info!("Dispatcher stopped");
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let path = config.transport.websocket_path.clone();
    let state = AppState::start(config);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Tableau server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, path);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": state.ctx.stats(),
    }))
}

/// Frame encoding of a connection, chosen with `?encoding=`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Length-prefixed MessagePack in binary messages.
    #[default]
    Binary,
    /// One JSON frame per text message.
    Json,
}

#[derive(Debug, Default, Deserialize)]
struct WsParams {
    #[serde(default)]
    encoding: Encoding,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let max = state.config.limits.max_connections;
    if state.active_connections() >= max {
        warn!(max, "Connection limit reached");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_websocket(socket, state, params.encoding))
}

/// Serialize a frame for the wire.
fn to_message(frame: &Frame, encoding: Encoding) -> Result<Message, ProtocolError> {
    Ok(match encoding {
        Encoding::Binary => Message::Binary(codec::encode(frame)?.to_vec()),
        Encoding::Json => Message::Text(codec::encode_json(frame)?),
    })
}

/// Write half of a connection.
struct Outbound {
    sender: SplitSink<WebSocket, Message>,
    encoding: Encoding,
}

impl Outbound {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let message = to_message(frame, self.encoding)?;
        let len = match &message {
            Message::Binary(data) => data.len(),
            Message::Text(text) => text.len(),
            _ => 0,
        };
        metrics::record_message(len, "outbound");
        self.sender.send(message).await?;
        Ok(())
    }

    async fn error(&mut self, code: u16, message: impl Into<String>) -> Result<()> {
        self.send(&Frame::error(code, message)).await
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, encoding: Encoding) {
    let _slot = ConnectionSlot::acquire(&state);
    let connection = ConnectionId::new(Uuid::new_v4().to_string());
    let limits = &state.config.limits;
    let heartbeat = &state.config.heartbeat;

    debug!(connection = %connection, ?encoding, "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let mut out = Outbound { sender, encoding };

    let interval_ms = u32::try_from(heartbeat.interval_ms).unwrap_or(u32::MAX);
    if out
        .send(&Frame::connected(connection.as_str(), interval_ms))
        .await
        .is_err()
    {
        error!(connection = %connection, "Failed to send Connected frame");
        return;
    }

    // Calls for this connection are written by this task only.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Frame>();
    let opened = Inbound::Connected {
        connection: connection.clone(),
        sink: Arc::new(frame_tx),
    };
    if state.dispatch_tx.send(opened).await.is_err() {
        error!(connection = %connection, "Dispatcher unavailable");
        return;
    }

    let period = Duration::from_millis(heartbeat.interval_ms.max(1));
    let timeout = Duration::from_millis(heartbeat.timeout_ms);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut last_seen = Instant::now();

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            Some(frame) = frame_rx.recv() => {
                if out.send(&frame).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                last_seen = Instant::now();
                let frames = match msg {
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_message(data.len(), "inbound");
                        if read_buffer.len() + data.len() > limits.max_message_size {
                            read_buffer.clear();
                            metrics::record_error("message_too_large");
                            if out.error(codes::MESSAGE_TOO_LARGE, "Message too large").await.is_err() {
                                break;
                            }
                            continue;
                        }
                        read_buffer.extend_from_slice(&data);
                        drain_frames(&mut read_buffer)
                    }
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        if text.len() > limits.max_message_size {
                            metrics::record_error("message_too_large");
                            if out.error(codes::MESSAGE_TOO_LARGE, "Message too large").await.is_err() {
                                break;
                            }
                            continue;
                        }
                        codec::decode_json(&text).map(|frame| vec![frame])
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection, "WebSocket stream ended");
                        break;
                    }
                };

                let frames = match frames {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(connection = %connection, error = %e, "Undecodable frame");
                        metrics::record_error("bad_frame");
                        if out.error(codes::BAD_FRAME, e.to_string()).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let mut open = true;
                for frame in frames {
                    if let Err(e) = handle_frame(frame, &connection, &state, &mut out).await {
                        debug!(connection = %connection, error = %e, "Closing connection");
                        open = false;
                        break;
                    }
                }
                if !open {
                    break;
                }
            }

            _ = ticker.tick() => {
                if last_seen.elapsed() > timeout {
                    info!(connection = %connection, "Heartbeat timeout");
                    break;
                }
                if out.send(&Frame::ping()).await.is_err() {
                    break;
                }
            }
        }
    }

    let closed = Inbound::Disconnected {
        connection: connection.clone(),
    };
    if state.dispatch_tx.send(closed).await.is_err() {
        warn!(connection = %connection, "Dispatcher unavailable on disconnect");
    }

    debug!(connection = %connection, "WebSocket disconnected");
}

/// Decode every complete frame in `buf`. On error the buffer is discarded.
fn drain_frames(buf: &mut BytesMut) -> Result<Vec<Frame>, ProtocolError> {
    let mut frames = Vec::new();
    loop {
        match codec::decode_from(buf) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => return Ok(frames),
            Err(e) => {
                buf.clear();
                return Err(e);
            }
        }
    }
}

/// Handle a decoded frame. An error closes the connection.
async fn handle_frame(
    frame: Frame,
    connection: &ConnectionId,
    state: &AppState,
    out: &mut Outbound,
) -> Result<()> {
    match frame {
        Frame::Call { op, args } => {
            debug!(connection = %connection, op = %op, "Call");
            state
                .dispatch_tx
                .send(Inbound::Call {
                    connection: connection.clone(),
                    op,
                    args,
                })
                .await
                .context("Dispatcher unavailable")?;
        }

        Frame::Ping { timestamp } => {
            out.send(&Frame::pong(timestamp)).await?;
        }

        Frame::Pong { .. } => {}

        other => {
            warn!(connection = %connection, frame_type = ?other.frame_type(), "Unexpected frame type");
            out.error(
                codes::UNEXPECTED_FRAME,
                format!("Unexpected frame {:?}", other.frame_type()),
            )
            .await?;
        }
    }

    Ok(())
}
