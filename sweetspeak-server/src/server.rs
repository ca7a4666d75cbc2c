//! Server composition: WebSocket endpoint, handshake, queue wiring, sweep.
//!
//! Each accepted WebSocket becomes a [`Connection`]. The connection task
//! waits for an Introduction, registers the client, then forwards every
//! envelope the read pump produces onto the shared inbound queue until the
//! connection closes. One [`Dispatcher`] task consumes the queue and one
//! sweep task evicts disconnected clients on a fixed interval.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use futures_util::{SinkExt, StreamExt, future};
use sweetspeak_proto::connection::{
    self, Connection, ConnectionError, ConnectionOptions, Frame,
};
use sweetspeak_proto::message::{MessageKind, Payload};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::dispatch::{DispatchConfig, Dispatcher, Inbound};
use crate::registry::{ClientRecord, Registration, RegistryError};
use crate::state::{ServerState, SharedState};

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested bind address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Why a new connection was turned away before registration.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// No envelope arrived within the handshake timeout.
    #[error("no introduction within {0:?}")]
    Timeout(Duration),

    /// The connection closed before introducing itself.
    #[error("connection closed before introduction")]
    Closed,

    /// The first envelope was not an Introduction.
    #[error("expected introduction, got {0}")]
    UnexpectedKind(MessageKind),

    /// The registry refused the identity.
    #[error(transparent)]
    Rejected(#[from] RegistryError),
}

#[derive(Clone)]
struct AppState {
    shared: SharedState,
    queue: mpsc::Sender<Inbound>,
    handshake_timeout: Duration,
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: SharedState,
    serve: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL of the chat endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.local_addr)
    }

    /// Shared server state, for inspection.
    #[must_use]
    pub const fn state(&self) -> &SharedState {
        &self.state
    }

    /// Stops accepting, stops the dispatcher and the sweep, and closes every
    /// registered connection.
    pub async fn shutdown(self) {
        self.serve.abort();
        self.dispatcher.abort();
        self.sweep.abort();

        let records = self.state.lock().await.registry.drain();
        for record in records {
            record.connection.close().await;
        }
        tracing::info!(addr = %self.local_addr, "server shut down");
    }

    /// Waits until the accept loop exits.
    pub async fn wait(self) {
        if let Err(e) = self.serve.await {
            tracing::error!(error = %e, "server task failed");
        }
    }
}

/// Starts a server on `addr` with default settings.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address cannot be bound.
pub async fn start_server(addr: &str) -> Result<ServerHandle, ServerError> {
    let config = ServerConfig {
        bind_addr: addr.to_string(),
        ..ServerConfig::default()
    };
    start_server_with_config(&config).await
}

/// Starts a server from a resolved [`ServerConfig`].
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the configured address cannot be bound.
pub async fn start_server_with_config(config: &ServerConfig) -> Result<ServerHandle, ServerError> {
    let bind_error = |source| ServerError::Bind {
        addr: config.bind_addr.clone(),
        source,
    };
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;

    let shared = ServerState::new(config.max_session_log).into_shared();
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));

    let dispatcher = Dispatcher::new(
        Arc::clone(&shared),
        queue_rx,
        DispatchConfig {
            write_timeout: config.write_timeout,
        },
    );
    let dispatcher = tokio::spawn(dispatcher.run().instrument(tracing::info_span!("dispatcher")));

    let sweep = tokio::spawn(
        sweep_loop(Arc::clone(&shared), config.sweep_interval)
            .instrument(tracing::info_span!("sweep")),
    );

    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(AppState {
            shared: Arc::clone(&shared),
            queue: queue_tx,
            handshake_timeout: config.handshake_timeout,
        });

    let serve = tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            tracing::error!(error = %e, "server error");
        }
    });

    tracing::info!(addr = %local_addr, "server listening");
    Ok(ServerHandle {
        local_addr,
        state: shared,
        serve,
        dispatcher,
        sweep,
    })
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(app): State<AppState>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| {
        let connection = websocket_connection(socket, peer);
        let span = connection.span().clone();
        serve_connection(connection, app).instrument(span)
    })
}

/// Adapts an axum WebSocket to the frame sink/stream a [`Connection`] wraps.
fn websocket_connection(socket: WebSocket, peer: SocketAddr) -> Arc<Connection> {
    let (ws_sink, ws_stream) = socket.split();
    let sink = ws_sink
        .sink_map_err(|e| connection::map_boxed_error(e.into_inner()))
        .with(|frame: Frame| future::ready(Ok::<_, ConnectionError>(to_ws_message(frame))));
    let stream = ws_stream.map(|item| {
        item.map(from_ws_message)
            .map_err(|e| connection::map_boxed_error(e.into_inner()))
    });
    Connection::new(
        peer.to_string(),
        Box::pin(sink),
        Box::pin(stream),
        ConnectionOptions::default(),
    )
}

fn from_ws_message(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Close(_) => Frame::Close,
        Message::Ping(_) | Message::Pong(_) => Frame::Control,
    }
}

fn to_ws_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Close => Message::Close(None),
        Frame::Control => Message::Ping(Vec::<u8>::new().into()),
    }
}

/// Lifecycle of one accepted connection.
async fn serve_connection(connection: Arc<Connection>, app: AppState) {
    if let Err(e) = connection.start() {
        tracing::warn!(error = %e, "could not start connection");
        return;
    }

    let key = match handshake(&connection, &app).await {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(error = %e, "handshake failed, closing connection");
            connection.close().await;
            return;
        }
    };

    forward_inbound(&connection, &key, &app.queue)
        .instrument(tracing::info_span!("client", id = %key))
        .await;

    app.shared
        .lock()
        .await
        .registry
        .mark_disconnected(&key, &connection);
    tracing::info!(client = %key, "client disconnected");
}

/// Waits for the Introduction and registers the client. Returns its
/// registry key.
async fn handshake(connection: &Arc<Connection>, app: &AppState) -> Result<String, HandshakeError> {
    let envelope = match connection.read_with_timeout(app.handshake_timeout).await {
        Ok(envelope) => envelope,
        Err(ConnectionError::Timeout) => return Err(HandshakeError::Timeout(app.handshake_timeout)),
        Err(_) => return Err(HandshakeError::Closed),
    };

    let kind = envelope.kind();
    let Payload::Introduction(intro) = envelope.payload else {
        return Err(HandshakeError::UnexpectedKind(kind));
    };

    let record = ClientRecord::new(intro.user, intro.client_id, Arc::clone(connection));
    let key = record.key().to_owned();
    let name = record.identity.name.clone();

    let outcome = app.shared.lock().await.registry.register(record)?;
    if let Registration::Replaced(old) = outcome {
        tracing::info!(client = %key, "replacing existing connection for identity");
        old.connection.close().await;
    }

    tracing::info!(client = %key, name = %name, peer = %connection.peer(), "client registered");
    Ok(key)
}

/// Pushes every envelope read from `connection` onto the shared queue,
/// waiting when the queue is full. Returns when the connection closes.
async fn forward_inbound(connection: &Connection, key: &str, queue: &mpsc::Sender<Inbound>) {
    while let Some(envelope) = connection.read().await {
        let inbound = Inbound {
            client_key: key.to_owned(),
            envelope,
        };
        if queue.send(inbound).await.is_err() {
            tracing::debug!("inbound queue closed");
            break;
        }
    }
}

/// Evicts disconnected clients every `interval`.
async fn sweep_loop(shared: SharedState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let evicted = shared.lock().await.registry.evict_closed();
        for record in evicted {
            record.connection.close().await;
        }
    }
}
