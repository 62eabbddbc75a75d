//! WebSocket transport server using Axum.
//!
//! Handles HTTP upgrade to WebSocket, heartbeat pings, per-connection
//! outbound queues, and hands every text frame to the `FrameHandler`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ClientSocket, Outbound};

/// What the transport should do with a connection after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    Continue,
    Close,
}

/// Trait implemented by the relay server to process connection events.
///
/// `handle_frame` is awaited before the next frame of the same connection is
/// read, so frames from one client are processed in arrival order.
pub trait FrameHandler: Send + Sync + 'static {
    /// A socket was accepted.
    fn on_connect(&self, socket: ClientSocket) -> impl std::future::Future<Output = ()> + Send;

    /// A text frame arrived.
    fn handle_frame(
        &self,
        client_id: &str,
        text: &str,
    ) -> impl std::future::Future<Output = FrameVerdict> + Send;

    /// The socket is gone (closed by either side or by a transport error).
    fn on_disconnect(&self, client_id: &str) -> impl std::future::Future<Output = ()> + Send;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Heartbeat ping interval in ms. 0 to disable.
    pub heartbeat_interval_ms: u64,
    /// Take the client address from `X-Forwarded-For`
    pub trust_proxy: bool,
    /// Enable verbose connection logging
    pub verbose_logging: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 6060,
            hostname: "127.0.0.1".into(),
            max_connections: Some(1024),
            heartbeat_interval_ms: 30_000,
            trust_proxy: false,
            verbose_logging: false,
        }
    }
}

/// Shared state for the transport server.
struct AppState<H: FrameHandler> {
    handler: Arc<H>,
    config: TransportConfig,
    /// Connected client count (for health check)
    client_count: Arc<AtomicUsize>,
}

/// The transport server: accepts WebSocket connections and feeds frames to the handler.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl TransportServer {
    /// Start the transport server with the given frame handler.
    pub async fn start<H: FrameHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let state = Arc::new(AppState {
            handler,
            config: config.clone(),
            client_count: Arc::new(AtomicUsize::new(0)),
        });

        let app = Router::new()
            .route("/ws", get(ws_upgrade_handler::<H>))
            .route("/health", get(health_handler::<H>))
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!("Relay transport listening on ws://{}:{}/ws", config.hostname, actual_port);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Relay transport server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: FrameHandler>(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    // Check connection limit
    if let Some(max) = state.config.max_connections {
        let current = state.client_count.load(Ordering::Relaxed);
        if current >= max {
            warn!("Connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    let address = resolve_address(peer, &headers, state.config.trust_proxy);
    ws.on_upgrade(move |socket| handle_ws_connection(socket, address, state))
        .into_response()
}

async fn health_handler<H: FrameHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.client_count.load(Ordering::Relaxed),
    }))
}

/// First hop of `X-Forwarded-For` when trusted, else the peer IP.
fn resolve_address(peer: SocketAddr, headers: &HeaderMap, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return addr.to_string();
        }
    }
    peer.ip().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<H: FrameHandler>(
    socket: WebSocket,
    address: String,
    state: Arc<AppState<H>>,
) {
    state.client_count.fetch_add(1, Ordering::Relaxed);

    let client_id = uuid::Uuid::new_v4().to_string();
    if state.config.verbose_logging {
        info!(client_id = %client_id, address = %address, "Client connected");
    } else {
        debug!(client_id = %client_id, "Client connected");
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client, mut out_rx) = ClientSocket::new(client_id.clone(), address);
    state.handler.on_connect(client).await;

    let heartbeat_ms = state.config.heartbeat_interval_ms;
    let mut heartbeat = (heartbeat_ms > 0).then(|| {
        let period = Duration::from_millis(heartbeat_ms);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        let tick = async {
            match heartbeat.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            // Incoming WebSocket message
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let verdict = state.handler.handle_frame(&client_id, text.as_str()).await;
                        if verdict == FrameVerdict::Close {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, "WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            // Queued outbound frames for this client
            outbound = out_rx.recv() => {
                match outbound {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                            debug!(client_id = %client_id, "Failed to deliver frame: {e}");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = tick => {
                if ws_tx.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Drop the receiver first so sends racing with cleanup see a closed socket.
    drop(out_rx);
    state.handler.on_disconnect(&client_id).await;

    state.client_count.fetch_sub(1, Ordering::Relaxed);
    debug!(client_id = %client_id, total = state.client_count.load(Ordering::Relaxed), "Client disconnected");
}
