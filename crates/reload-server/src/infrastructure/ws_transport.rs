//! WebSocket transport adapter: upgrade, register, run.
//!
//! [`handle_upgrade`] is called once per accepted socket, plaintext or TLS.
//! It:
//!
//! 1. Completes the WebSocket handshake, refusing any path other than the
//!    configured upgrade path with `404 Not Found` and any request that is
//!    not a valid upgrade with `400 Bad Request`.
//! 2. Creates a [`Connection`] and registers its handle with the [`Hub`].
//! 3. Splits the WebSocket into a write half ([`WsFrameSink`]) and a read
//!    half ([`WsFrameSource`]) and runs the connection until it closes.
//!
//! Reload messages go out as text frames.  Inbound frames are only used as
//! a sign of life; tokio-tungstenite answers browser pings on its own.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, info};

use reload_hub::{
    CloseReason, Connection, ConnectionIoError, ConnectionOptions, FrameSink, FrameSource, Hub,
    InboundFrame, Keepalive,
};

use crate::domain::ServerConfig;
use crate::infrastructure::error::UpgradeError;

// ── Public API ────────────────────────────────────────────────────────────────

/// Upgrades `stream` to a WebSocket, registers it with `hub` and runs it
/// until the browser goes away.
///
/// # Errors
///
/// Returns [`UpgradeError`] if the handshake fails or targets the wrong
/// path, or if the hub is no longer running.  Once the connection is
/// registered, socket failures are not errors: they end the connection and
/// show up in the returned [`CloseReason`].
pub async fn handle_upgrade<S>(
    stream: S,
    peer: SocketAddr,
    hub: Hub,
    config: Arc<ServerConfig>,
) -> Result<CloseReason, UpgradeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = accept_websocket(stream, &config).await?;
    info!("browser connected from {peer}");

    let (connection, handle) = Connection::new(Some(peer), config.queue_capacity);
    hub.register(handle).await?;

    let (sink, source) = ws_stream.split();
    let reason = connection
        .run(
            &hub,
            WsFrameSink { inner: sink },
            WsFrameSource { inner: source },
            connection_options(&config),
        )
        .await;

    Ok(reason)
}

/// Per-connection options derived from the server configuration.
pub fn connection_options(config: &ServerConfig) -> ConnectionOptions {
    ConnectionOptions {
        write_timeout: config.write_timeout,
        keepalive: config.keepalive_enabled().then_some(Keepalive {
            ping_interval: config.ping_interval,
            pong_wait: config.pong_wait,
        }),
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Reply sent when a request cannot be upgraded at all.
const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// Runs the server side of the WebSocket handshake.
///
/// The handshake borrows the stream so that a request tungstenite rejects
/// (missing upgrade headers, wrong method, garbage) can still be answered
/// with `400 Bad Request`.  On success the owned stream is wrapped as an
/// established server-side WebSocket; a compliant client sends nothing
/// before it has seen the `101` response, so no bytes are left behind.
async fn accept_websocket<S>(
    mut stream: S,
    config: &ServerConfig,
) -> Result<WebSocketStream<S>, UpgradeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut rejected_path: Option<String> = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let path = request.uri().path();
        if path == config.upgrade_path {
            return Ok(response);
        }
        rejected_path = Some(path.to_string());
        let mut reply = ErrorResponse::new(Some(format!("no upgrade endpoint at {path}")));
        *reply.status_mut() = StatusCode::NOT_FOUND;
        Err(reply)
    };

    // `map(drop)` ends the borrow of `stream` held by the handshaken socket.
    let handshake =
        accept_hdr_async_with_config(&mut stream, callback, Some(websocket_config(config)))
            .await
            .map(drop);

    match handshake {
        Ok(()) => Ok(WebSocketStream::from_raw_socket(
            stream,
            Role::Server,
            Some(websocket_config(config)),
        )
        .await),
        Err(e) => match rejected_path {
            // tungstenite already wrote the 404.
            Some(path) => Err(UpgradeError::PathNotFound { path }),
            None => {
                if is_bad_request(&e) {
                    reject_bad_request(&mut stream, config.write_timeout).await;
                }
                Err(UpgradeError::Handshake(e))
            }
        },
    }
}

/// `true` for errors caused by the request itself, as opposed to the peer
/// vanishing mid-handshake.
fn is_bad_request(e: &WsError) -> bool {
    matches!(
        e,
        WsError::Protocol(_) | WsError::Capacity(_) | WsError::HttpFormat(_) | WsError::Utf8
    )
}

/// Writes a `400 Bad Request` and shuts the write side down.  Failures are
/// only logged: the client is being turned away either way.
async fn reject_bad_request<S>(stream: &mut S, limit: Duration)
where
    S: AsyncWrite + Unpin,
{
    let reply = async {
        stream.write_all(BAD_REQUEST).await?;
        stream.shutdown().await
    };
    match timeout(limit, reply).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("could not send 400 reply: {e}"),
        Err(_) => debug!("400 reply did not complete within {limit:?}"),
    }
}

/// Frame limits for inbound traffic.  Browsers have nothing to say, so the
/// limits are small.
fn websocket_config(config: &ServerConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);
    ws_config
}

// ── FrameSink / FrameSource over tungstenite ──────────────────────────────────

/// Write half of a browser WebSocket.
pub struct WsFrameSink<S> {
    inner: SplitSink<WebSocketStream<S>, WsMessage>,
}

/// Read half of a browser WebSocket.
pub struct WsFrameSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameSink for WsFrameSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_frame(&mut self, payload: Bytes) -> Result<(), ConnectionIoError> {
        let text = String::from_utf8_lossy(&payload).into_owned();
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(write_error)
    }

    async fn send_ping(&mut self) -> Result<(), ConnectionIoError> {
        self.inner
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(write_error)
    }

    async fn close(&mut self) {
        // Sends a Close frame if the socket is still writable.
        if let Err(e) = self.inner.close().await {
            debug!("WebSocket close did not complete cleanly: {e}");
        }
    }
}

#[async_trait]
impl<S> FrameSource for WsFrameSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionIoError>> {
        match self.inner.next().await? {
            Ok(WsMessage::Close(_)) => None,
            Ok(WsMessage::Ping(_)) => Some(Ok(InboundFrame::Ping)),
            Ok(WsMessage::Pong(_)) => Some(Ok(InboundFrame::Pong)),
            Ok(WsMessage::Text(_) | WsMessage::Binary(_) | WsMessage::Frame(_)) => {
                Some(Ok(InboundFrame::Data))
            }
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => None,
            Err(e) => Some(Err(ConnectionIoError::Read(e.to_string()))),
        }
    }
}

fn write_error(e: WsError) -> ConnectionIoError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectionIoError::Closed,
        other => ConnectionIoError::Write(other.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
