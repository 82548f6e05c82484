//! Error types for the listeners and the WebSocket upgrade.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use reload_hub::HubError;

/// An inbound connection that never became a registered browser.
///
/// Logged by the listener; the process carries on.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The request was not a valid WebSocket upgrade (missing headers,
    /// wrong method, protocol mismatch, or the peer hung up mid-handshake).
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[source] WsError),

    /// The upgrade targeted a path other than the configured one.  The
    /// client was sent a `404 Not Found`.
    #[error("no upgrade endpoint at {path}")]
    PathNotFound { path: String },

    /// The TLS handshake failed before any HTTP was exchanged.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[source] io::Error),

    /// The hub stopped, so the connection could not be registered.
    #[error("cannot register connection: {0}")]
    Hub(#[from] HubError),
}

/// A listener that could not start.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),
}
