//! Gateway lifecycle and connection handling.
//!
//! This module owns the server lifecycle: accepting WebSocket upgrades,
//! running the authentication handshake, wiring each admitted connection
//! into the registry, and shutting the whole thing down idempotently.
//!
//! Each connection gets two tasks: a writer that owns the sink and drains
//! the connection's outbound queue, and a reader that is the sole consumer
//! of the inbound stream, preserving per-sender ordering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router as AxumRouter,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mentorlink_core::{
    ConnectionRegistry, IdentityVerifier, Outbound, OutboundReceiver, ProfileDirectory,
    RoomManager, Router, VerifiedIdentity,
};
use mentorlink_protocol::{codec, CloseCode, Envelope, SystemAction};

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: Router,
    /// Connection registry; admission and teardown go through here.
    pub registry: Arc<ConnectionRegistry>,
    /// Room membership.
    pub rooms: Arc<RoomManager>,
    /// Credential verifier.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Server configuration.
    pub config: Config,
    /// Liveness monitor handle, taken by shutdown.
    monitor: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl AppState {
    /// Create new app state over the given collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        verifier: Arc<dyn IdentityVerifier>,
        directory: Arc<dyn ProfileDirectory>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new());
        let router = Router::new(registry.clone(), rooms.clone(), directory);

        Self {
            router,
            registry,
            rooms,
            verifier,
            config,
            monitor: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Store the liveness monitor handle so shutdown can cancel it.
    pub fn set_monitor(&self, handle: JoinHandle<()>) {
        if let Ok(mut guard) = self.monitor.lock() {
            *guard = Some(handle);
        }
    }

    /// Check whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Shut the gateway down.
    ///
    /// Idempotent: the first call stops the monitor, notifies and closes
    /// every connection, and clears both registries; later calls return
    /// without doing anything.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // Cancel the probe loop before clearing, so a pass never runs
        // against an emptied registry.
        if let Some(handle) = self.monitor.lock().ok().and_then(|mut guard| guard.take()) {
            handle.abort();
        }

        let notice = Arc::new(Envelope::system(SystemAction::Shutdown));
        let closed = self.registry.clear(notice, CloseCode::ServerShutdown);
        self.rooms.clear();
        metrics::set_active_rooms(0);

        info!(connections = closed, "Gateway shut down");
    }
}

/// Run the gateway.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound; this is the only
/// process-fatal failure.
pub async fn run_server(config: Config) -> Result<()> {
    let verifier = Arc::new(crate::auth::JwtVerifier::new(config.auth.jwt_secret.as_bytes()));
    let directory = Arc::new(crate::directory::HttpDirectory::new(
        config.auth.directory_base_url.clone(),
    ));
    let state = Arc::new(AppState::new(config.clone(), verifier, directory));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Start the liveness monitor
    let monitor = crate::monitor::LivenessMonitor::new(
        state.registry.clone(),
        state.rooms.clone(),
        Duration::from_millis(config.heartbeat.interval_ms),
    );
    state.set_monitor(monitor.spawn());

    // Build router
    let app = AxumRouter::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state.clone());

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("mentorlink gateway listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
    state.shutdown();
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Gateway statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.router.stats())
}

/// Query parameters for WebSocket connection establishment.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

/// Run the authentication handshake, then serve the connection.
///
/// No envelope is accepted before the credential verifies; failures close
/// the transport with a code that tells the client whether retrying can
/// help.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    let Some(token) = token else {
        debug!("Connection attempt without credential");
        metrics::record_error("auth");
        close_with(socket, CloseCode::MissingCredential).await;
        return;
    };

    let verified = match state.verifier.verify(&token).await {
        Ok(verified) => verified,
        Err(err) => {
            warn!(error = %err, "Authentication failed");
            metrics::record_error("auth");
            close_with(socket, CloseCode::AuthenticationFailed).await;
            return;
        }
    };

    if state.is_shutting_down() {
        close_with(socket, CloseCode::ServerShutdown).await;
        return;
    }

    serve_connection(socket, state, verified).await;
}

async fn close_with(mut socket: WebSocket, code: CloseCode) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: code.code(),
            reason: code.reason().into(),
        })))
        .await;
}

/// Serve an admitted connection until its stream ends.
async fn serve_connection(socket: WebSocket, state: Arc<AppState>, verified: VerifiedIdentity) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let VerifiedIdentity { identity, role } = verified;

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = state.registry.admit(identity.clone(), role, tx);
    let session = handle.session();
    info!(identity = %identity, role = %role, "Connection established");

    // Writer task: owns the sink, drains this connection's outbound queue.
    let writer = tokio::spawn(writer_task(ws_sender, rx));

    // Acknowledge admission, advertising the probe interval.
    state.registry.send(
        &identity,
        Arc::new(Envelope::connected(state.config.heartbeat.interval_ms).with_recipient(&identity)),
    );

    let max_message_size = state.config.limits.max_message_size;

    // Reader loop: the sole consumer of this connection's inbound stream,
    // so messages from one sender are processed in arrival order.
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_incoming(&state, &identity, text.as_bytes(), max_message_size).await;
            }
            Ok(Message::Binary(data)) => {
                handle_incoming(&state, &identity, &data, max_message_size).await;
            }
            // axum answers inbound pings itself; both control frames are
            // unrelated to the protocol-level probe cycle.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(frame)) => {
                debug!(identity = %identity, frame = ?frame, "Client closed connection");
                break;
            }
            Err(err) => {
                warn!(identity = %identity, error = %err, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
        }
    }

    // Teardown for this session only: if a newer session displaced us, the
    // registry entry and room memberships belong to it and stay.
    if state.registry.evict_session(&identity, session) {
        state.rooms.purge(&identity);
        metrics::record_eviction("disconnect");
    }
    writer.abort();

    debug!(identity = %identity, "Connection closed");
}

async fn handle_incoming(state: &Arc<AppState>, identity: &str, data: &[u8], max_size: usize) {
    if data.len() > max_size {
        warn!(identity = %identity, size = data.len(), "Oversized inbound message");
        metrics::record_error("oversized");
        state.registry.send(
            identity,
            Arc::new(Envelope::system_error("message too large").with_recipient(identity)),
        );
        return;
    }

    metrics::record_message(data.len(), "inbound");
    state.router.handle_inbound(identity, data).await;
}

/// Forward queued outbound traffic to the WebSocket sink.
///
/// Exits when the queue closes (the connection was evicted and every
/// sender dropped), when a close command arrives, or when the sink dies.
async fn writer_task(mut sink: SplitSink<WebSocket, Message>, mut rx: OutboundReceiver) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Envelope(envelope) => match codec::encode(&envelope) {
                Ok(text) => {
                    metrics::record_message(text.len(), "outbound");
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "Failed to encode outbound envelope");
                    metrics::record_error("encode");
                }
            },
            Outbound::Close(code) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: code.code(),
                        reason: code.reason().into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
