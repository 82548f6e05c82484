//! Error types shared by the hub and the transport layer.

use std::time::Duration;

use thiserror::Error;

/// A socket-level failure on an established connection.
///
/// These never escape the connection that produced them: the connection is
/// torn down, unregistered from the hub, and the error ends up in a log line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionIoError {
    /// Reading the next inbound frame failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Writing an outbound frame failed.
    #[error("write failed: {0}")]
    Write(String),

    /// The peer did not accept a frame within the write timeout.
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    /// The socket was already closed when a write was attempted.
    #[error("connection already closed")]
    Closed,
}

/// Errors returned by the [`Hub`](crate::Hub) handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub's coordination loop is no longer running, so the request
    /// could not be delivered.
    #[error("hub loop has stopped")]
    Stopped,
}
