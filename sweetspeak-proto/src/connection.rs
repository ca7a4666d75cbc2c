//! Connection handler: one framed bidirectional stream per peer.
//!
//! A [`Connection`] wraps the two halves of a WebSocket (or any frame
//! sink/stream pair). Once started, a background read pump decodes incoming
//! frames into [`Envelope`]s and queues them on a private bounded channel;
//! callers consume them with [`Connection::read`] and friends. Writes encode
//! and send synchronously through [`Connection::write`].
//!
//! Read pump policy:
//! - a frame that does not decode is logged and dropped, the sender is never told
//! - a close frame or end of stream closes the connection quietly
//! - any other read error is retried with backoff, up to the configured
//!   [`RetryPolicy`]; exhausting it closes the connection
//!
//! Closing is one-way and idempotent.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::Instrument;

use crate::codec::{self, CodecError};
use crate::message::Envelope;
use crate::retry::RetryPolicy;

/// Timeout for establishing an outbound WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on sending the close frame while shutting a connection down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Transport-neutral view of a WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame. Envelopes are sent this way.
    Text(String),
    /// Binary frame. Accepted on read and decoded like text.
    Binary(Vec<u8>),
    /// The remote asked to close.
    Close,
    /// Ping, pong, or raw frames; ignored by the read pump.
    Control,
}

/// Write half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ConnectionError> + Send>>;

/// Read half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ConnectionError>> + Send>>;

/// Errors that can occur on a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection has been closed, locally or by the remote.
    #[error("connection closed")]
    Closed,

    /// No envelope arrived within the allotted time.
    #[error("timed out waiting for a message")]
    Timeout,

    /// [`Connection::start`] was called twice.
    #[error("connection read pump already started")]
    AlreadyStarted,

    /// The server address is not a usable WebSocket URL.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    /// The outbound connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// An envelope could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The underlying stream reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Tuning knobs for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Capacity of the private inbound envelope channel.
    pub inbound_capacity: usize,
    /// Backoff and cap applied to consecutive read errors.
    pub read_retry: RetryPolicy,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            inbound_capacity: 64,
            read_retry: RetryPolicy::default(),
        }
    }
}

/// One bidirectional envelope stream.
///
/// Shared as `Arc<Connection>`. Writes go through an async mutex around the
/// sink, so concurrent writers on one connection are serialized rather than
/// interleaved.
pub struct Connection {
    /// Remote address or URL, for logs.
    peer: String,
    /// Write half; `None` once closed.
    sink: Mutex<Option<FrameSink>>,
    /// Read half and channel sender, handed to the read pump by `start`.
    pending: parking_lot::Mutex<Option<(FrameStream, mpsc::Sender<Envelope>)>>,
    /// Decoded envelopes produced by the read pump.
    inbound: Mutex<mpsc::Receiver<Envelope>>,
    closed: AtomicBool,
    /// Wakes the read pump when `close` is called locally.
    shutdown: Notify,
    read_retry: RetryPolicy,
    span: tracing::Span,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wraps a frame sink and stream. The read pump is not running until
    /// [`Connection::start`] is called.
    pub fn new(
        peer: impl Into<String>,
        sink: FrameSink,
        stream: FrameStream,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let peer = peer.into();
        let (tx, rx) = mpsc::channel(options.inbound_capacity.max(1));
        let span = tracing::info_span!("connection", peer = %peer);
        Arc::new(Self {
            peer,
            sink: Mutex::new(Some(sink)),
            pending: parking_lot::Mutex::new(Some((stream, tx))),
            inbound: Mutex::new(rx),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            read_retry: options.read_retry,
            span,
        })
    }

    /// Wraps an established tungstenite WebSocket.
    pub fn from_websocket<S>(
        ws: WebSocketStream<S>,
        peer: impl Into<String>,
        options: ConnectionOptions,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_sink, ws_stream) = ws.split();
        let sink = ws_sink
            .sink_map_err(map_ws_error)
            .with(|frame: Frame| future::ready(Ok::<_, ConnectionError>(to_message(frame))));
        let stream = ws_stream.map(|item| item.map(from_message).map_err(map_ws_error));
        Self::new(peer, Box::pin(sink), Box::pin(stream), options)
    }

    /// Remote address or URL this connection talks to.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Span carrying this connection's context; child components log under it.
    #[must_use]
    pub const fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Spawns the read pump.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::AlreadyStarted`] on a second call, or
    /// [`ConnectionError::Closed`] if the connection was closed before starting.
    pub fn start(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let Some((stream, tx)) = self.pending.lock().take() else {
            return Err(ConnectionError::AlreadyStarted);
        };
        let pump = Arc::clone(self).read_pump(stream, tx);
        tokio::spawn(pump.instrument(self.span.clone()));
        Ok(())
    }

    /// Waits for the next envelope. Returns `None` once the connection is
    /// closed and every queued envelope has been consumed.
    pub async fn read(&self) -> Option<Envelope> {
        self.inbound.lock().await.recv().await
    }

    /// Returns the next queued envelope without waiting.
    pub fn try_read(&self) -> Option<Envelope> {
        self.inbound.try_lock().ok()?.try_recv().ok()
    }

    /// Waits up to `timeout` for the next envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Timeout`] if nothing arrived in time, or
    /// [`ConnectionError::Closed`] if the connection closed first.
    pub async fn read_with_timeout(&self, timeout: Duration) -> Result<Envelope, ConnectionError> {
        match tokio::time::timeout(timeout, self.read()).await {
            Ok(Some(envelope)) => Ok(envelope),
            Ok(None) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Encodes `envelope` and sends it as one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is closed, a
    /// codec error if encoding fails, or the transport's send error.
    pub async fn write(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let text = codec::encode(envelope)?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ConnectionError::Closed)?;
        sink.send(Frame::Text(text)).await
    }

    /// Whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the connection: stops the read pump, sends a close frame,
    /// releases the stream, and closes the inbound channel. Calls after the
    /// first are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.notify_one();
        drop(self.pending.lock().take());

        let release = async {
            let sink = self.sink.lock().await.take();
            if let Some(mut sink) = sink {
                let _ = sink.send(Frame::Close).await;
                let _ = sink.close().await;
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, release).await.is_err() {
            tracing::warn!(parent: &self.span, "timed out releasing connection");
        }
        tracing::debug!(parent: &self.span, "connection closed");
    }

    async fn read_pump(self: Arc<Self>, mut stream: FrameStream, tx: mpsc::Sender<Envelope>) {
        let mut failures = 0u32;

        while !self.is_closed() {
            let next = tokio::select! {
                () = self.shutdown.notified() => break,
                next = stream.next() => next,
            };

            let bytes = match next {
                Some(Ok(Frame::Text(text))) => text.into_bytes(),
                Some(Ok(Frame::Binary(data))) => data,
                Some(Ok(Frame::Control)) => continue,
                Some(Ok(Frame::Close) | Err(ConnectionError::Closed)) | None => {
                    tracing::info!("connection closed by remote");
                    break;
                }
                Some(Err(e)) => {
                    failures += 1;
                    if !self.read_retry.allows_retry(failures) {
                        tracing::error!(error = %e, failures, "read failed repeatedly, closing");
                        break;
                    }
                    let delay = self.read_retry.delay_for(failures);
                    tracing::warn!(error = %e, failures, ?delay, "read failed, retrying");
                    tokio::select! {
                        () = self.shutdown.notified() => break,
                        () = tokio::time::sleep(delay) => continue,
                    }
                }
            };
            failures = 0;

            match codec::decode(&bytes) {
                Ok(envelope) => {
                    tokio::select! {
                        () = self.shutdown.notified() => break,
                        sent = tx.send(envelope) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable frame");
                }
            }
        }

        drop(tx);
        drop(stream);
        self.close().await;
    }
}

/// Opens an outbound WebSocket to `url` and wraps it in a [`Connection`].
///
/// The read pump is not started.
///
/// # Errors
///
/// - [`ConnectionError::InvalidUrl`] if `url` is not a `ws://` or `wss://` URL.
/// - [`ConnectionError::Timeout`] if the connection takes longer than 10 s.
/// - [`ConnectionError::Connect`] if the server cannot be reached or refuses
///   the upgrade.
pub async fn connect(
    url: &str,
    options: ConnectionOptions,
) -> Result<Arc<Connection>, ConnectionError> {
    let parsed = url::Url::parse(url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(ConnectionError::InvalidUrl(format!(
            "unsupported scheme {}",
            parsed.scheme()
        )));
    }

    tracing::debug!(url = %parsed, "dialing server");
    let dial = tokio_tungstenite::connect_async(parsed.as_str());
    let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, dial)
        .await
        .map_err(|_| {
            tracing::warn!(url = %parsed, "connect timed out");
            ConnectionError::Timeout
        })?
        .map_err(|e| {
            tracing::warn!(url = %parsed, error = %e, "connect failed");
            ConnectionError::Connect(e.to_string())
        })?;

    Ok(Connection::from_websocket(ws, parsed.as_str(), options))
}

fn from_message(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Close(_) => Frame::Close,
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::Control,
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Binary(data) => Message::binary(data),
        Frame::Close => Message::Close(None),
        Frame::Control => Message::Ping(Vec::<u8>::new().into()),
    }
}

/// Maps a tungstenite error, folding every flavour of remote hang-up into
/// [`ConnectionError::Closed`].
#[must_use]
pub fn map_ws_error(err: tungstenite::Error) -> ConnectionError {
    use tungstenite::Error as WsError;
    use tungstenite::error::ProtocolError;

    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => ConnectionError::Closed,
        WsError::Io(ref io) if is_hangup(io) => ConnectionError::Closed,
        other => ConnectionError::Transport(other.to_string()),
    }
}

/// Maps a type-erased transport error, as handed out by WebSocket servers
/// that wrap the tungstenite error, the same way as [`map_ws_error`].
#[must_use]
pub fn map_boxed_error(err: Box<dyn std::error::Error + Send + Sync>) -> ConnectionError {
    let err = match err.downcast::<tungstenite::Error>() {
        Ok(ws) => return map_ws_error(*ws),
        Err(other) => other,
    };
    match err.downcast::<std::io::Error>() {
        Ok(io) if is_hangup(&io) => ConnectionError::Closed,
        Ok(io) => ConnectionError::Transport(io.to_string()),
        Err(other) => ConnectionError::Transport(other.to_string()),
    }
}

fn is_hangup(io: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        io.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}
