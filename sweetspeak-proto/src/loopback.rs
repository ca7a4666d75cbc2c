//! In-memory connection pair for tests.
//!
//! [`pair`] returns a [`Connection`] whose remote end is a [`LoopbackPeer`]
//! held by the test. Frames travel over unbounded channels, so no sockets or
//! ports are involved.

use std::sync::Arc;

use futures_util::{sink, stream};
use tokio::sync::mpsc;

use crate::codec;
use crate::connection::{Connection, ConnectionError, ConnectionOptions, Frame};
use crate::message::Envelope;

/// The far end of a loopback [`Connection`].
///
/// Dropping the peer ends the connection's stream, which the read pump sees
/// as a remote hang-up.
#[derive(Debug)]
pub struct LoopbackPeer {
    to_connection: mpsc::UnboundedSender<Result<Frame, ConnectionError>>,
    from_connection: mpsc::UnboundedReceiver<Frame>,
}

/// Creates a connected pair. The connection's read pump is not started.
pub fn pair(
    peer: impl Into<String>,
    options: ConnectionOptions,
) -> (Arc<Connection>, LoopbackPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<Frame, ConnectionError>>();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();

    let frames = stream::unfold(in_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let sink = sink::unfold(out_tx, |tx: mpsc::UnboundedSender<Frame>, frame: Frame| async move {
        tx.send(frame).map_err(|_| ConnectionError::Closed)?;
        Ok::<_, ConnectionError>(tx)
    });

    let connection = Connection::new(peer, Box::pin(sink), Box::pin(frames), options);
    let remote = LoopbackPeer {
        to_connection: in_tx,
        from_connection: out_rx,
    };
    (connection, remote)
}

impl LoopbackPeer {
    /// Encodes `envelope` and delivers it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection side is gone.
    pub fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let text = codec::encode(envelope)?;
        self.send_frame(Ok(Frame::Text(text)))
    }

    /// Delivers a raw frame or read error to the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection side is gone.
    pub fn send_frame(&self, frame: Result<Frame, ConnectionError>) -> Result<(), ConnectionError> {
        self.to_connection
            .send(frame)
            .map_err(|_| ConnectionError::Closed)
    }

    /// Next frame written by the connection, or `None` once its sink is dropped.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.from_connection.recv().await
    }

    /// Next envelope written by the connection.
    ///
    /// Control frames are skipped. Returns `None` on a close frame, when the
    /// sink is dropped, or if a frame does not decode.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.recv_frame().await? {
                Frame::Text(text) => return codec::decode(text.as_bytes()).ok(),
                Frame::Binary(data) => return codec::decode(&data).ok(),
                Frame::Close => return None,
                Frame::Control => {}
            }
        }
    }

    /// Next envelope already written, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        match self.from_connection.try_recv().ok()? {
            Frame::Text(text) => codec::decode(text.as_bytes()).ok(),
            Frame::Binary(data) => codec::decode(&data).ok(),
            Frame::Close | Frame::Control => None,
        }
    }
}
