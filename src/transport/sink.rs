//! Serialized frame writer.
//!
//! Every outbound message for one socket (handshake, replies, mediator
//! pushes, pings, close) goes through a single [`FrameSink`]. The sink feeds
//! an unbounded channel drained by one writer loop that owns the socket's
//! write half, so frames are totally ordered and never interleave.
//!
//! ```text
//! ResponseWriter ─┐
//! Mediator push  ─┼──► FrameSink (mpsc) ──► writer task ──► WebSocket
//! Heartbeat ping ─┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;

use futures_util::{Sink, SinkExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// FrameKind
// ============================================================================

/// WebSocket message kind used for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameKind {
    /// Text message (the default).
    #[default]
    Text,
    /// Binary message.
    Binary,
}

impl FrameKind {
    /// Returns the kind of an inbound message, if it carries a frame.
    #[inline]
    #[must_use]
    pub fn of(message: &Message) -> Option<Self> {
        match message {
            Message::Text(_) => Some(Self::Text),
            Message::Binary(_) => Some(Self::Binary),
            _ => None,
        }
    }
}

// ============================================================================
// FrameSink
// ============================================================================

/// Cloneable handle for writing to one socket.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl FrameSink {
    /// Spawns the writer task for `write` and returns its handle.
    ///
    /// The task ends after sending a close message, on the first write
    /// error, or when every sink clone is dropped.
    pub fn spawn<W>(write: W) -> (Self, JoinHandle<Result<()>>)
    where
        W: Sink<Message, Error = WsError> + Unpin + Send + 'static,
    {
        let (sink, writer) = Self::channel(write);
        (sink, tokio::spawn(writer))
    }

    /// Creates a sink and the writer loop that drains it into `write`.
    ///
    /// The caller drives the returned future, typically alongside the
    /// connection's read loop. It resolves to [`Error::Write`] if the socket
    /// rejected a frame.
    pub fn channel<W>(mut write: W) -> (Self, impl Future<Output = Result<()>> + Send)
    where
        W: Sink<Message, Error = WsError> + Unpin + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = async move {
            let mut result = Ok(());

            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));

                if let Err(e) = write.send(message).await {
                    warn!(error = %e, "Failed to write frame");
                    result = Err(Error::write(e.to_string()));
                    break;
                }
                if closing {
                    break;
                }
            }

            rx.close();
            let _ = write.close().await;
            debug!("Writer terminated");
            result
        };

        (Self { tx }, writer)
    }

    /// Wraps a raw channel sender.
    ///
    /// Lets tests observe outbound messages without a socket.
    #[inline]
    #[must_use]
    pub fn from_sender(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Queues a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the writer task has ended.
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::ConnectionClosed)
    }

    /// Queues an encoded frame as a message of `kind`.
    ///
    /// A text frame that is not valid UTF-8 is sent as binary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the writer task has ended.
    pub fn send_frame(&self, kind: FrameKind, data: Vec<u8>) -> Result<()> {
        let message = match kind {
            FrameKind::Binary => Message::Binary(data.into()),
            FrameKind::Text => match String::from_utf8(data) {
                Ok(text) => Message::Text(text.into()),
                Err(e) => {
                    trace!("Text frame is not UTF-8, sending as binary");
                    Message::Binary(e.into_bytes().into())
                }
            },
        };
        self.send(message)
    }

    /// Queues `value` serialized as a JSON text message.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - [`Error::ConnectionClosed`] if the writer task has ended
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.send(Message::Text(json.into()))
    }

    /// Queues a ping control frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the writer task has ended.
    #[inline]
    pub fn ping(&self) -> Result<()> {
        self.send(Message::Ping(Default::default()))
    }

    /// Queues a close frame; the writer task stops after sending it.
    pub fn close(&self) {
        let _ = self.send(Message::Close(None));
    }

    /// Returns `true` if the writer task has ended.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_frame_text_and_binary() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = FrameSink::from_sender(tx);

        sink.send_frame(FrameKind::Text, b"{\"id\":\"1\"}".to_vec())
            .expect("send");
        sink.send_frame(FrameKind::Text, vec![0xff, 0xfe]).expect("send");
        sink.send_frame(FrameKind::Binary, b"raw".to_vec()).expect("send");

        assert!(matches!(rx.try_recv(), Ok(Message::Text(t)) if t.as_str() == "{\"id\":\"1\"}"));
        assert!(matches!(rx.try_recv(), Ok(Message::Binary(b)) if b[..] == [0xff, 0xfe]));
        assert!(matches!(rx.try_recv(), Ok(Message::Binary(b)) if &b[..] == b"raw"));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = FrameSink::from_sender(tx);
        drop(rx);

        assert!(sink.is_closed());
        assert!(matches!(sink.ping(), Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_writer_reports_socket_failure() {
        let failing = Box::pin(futures_util::sink::unfold((), |(), _: Message| async {
            Err::<(), WsError>(WsError::ConnectionClosed)
        }));
        let (sink, writer) = FrameSink::channel(failing);

        sink.ping().expect("queued");
        let result = writer.await;

        assert!(matches!(result, Err(Error::Write { .. })));
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_writer_ends_cleanly_after_close() {
        let (sink, writer) = FrameSink::channel(futures_util::sink::drain().sink_map_err(|never: std::convert::Infallible| -> WsError { match never {} }));

        sink.send_frame(FrameKind::Text, b"{}".to_vec()).expect("queued");
        sink.close();

        assert!(writer.await.is_ok());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_frame_kind_of() {
        assert_eq!(FrameKind::of(&Message::Text(String::from("x").into())), Some(FrameKind::Text));
        assert_eq!(
            FrameKind::of(&Message::Binary(vec![1u8].into())),
            Some(FrameKind::Binary)
        );
        assert_eq!(FrameKind::of(&Message::Ping(Default::default())), None);
    }
}
