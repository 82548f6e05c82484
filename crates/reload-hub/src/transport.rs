//! Transport seam between the hub and the socket layer.
//!
//! The hub never sees a socket.  A [`Connection`](crate::Connection) is
//! handed one [`FrameSink`] (the write half) and one [`FrameSource`] (the
//! read half), and that is the only way it reaches the network.
//!
//! The WebSocket implementation lives in `reload-server`; the in-memory
//! mocks used by tests live in [`crate::testing`].

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ConnectionIoError;

/// What the reader saw on the wire.
///
/// The content of inbound frames is not used; the reader only cares that
/// the peer is still talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text or binary data frame.
    Data,
    /// A protocol-level ping from the peer.
    Ping,
    /// A protocol-level pong, normally the answer to our keepalive ping.
    Pong,
}

/// The write half of one peer's socket.
///
/// Only the connection's writer task holds the sink, so at most one write is
/// ever in flight per connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Writes one payload as a single frame.
    async fn send_frame(&mut self, payload: Bytes) -> Result<(), ConnectionIoError>;

    /// Writes a keepalive ping frame.
    async fn send_ping(&mut self) -> Result<(), ConnectionIoError>;

    /// Closes the socket.  Called exactly once per connection.
    async fn close(&mut self);
}

/// The read half of one peer's socket.
#[async_trait]
pub trait FrameSource: Send {
    /// Waits for the next inbound frame.
    ///
    /// Returns `None` once the peer has closed the connection.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionIoError>>;
}
