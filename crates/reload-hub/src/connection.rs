//! One connected peer: its outbound queue and its reader/writer lifetime.
//!
//! A connection is split into two halves that live in different places:
//!
//! - [`ConnectionHandle`] is the sending end of the bounded outbound queue.
//!   It is handed to the hub, which only ever calls
//!   [`ConnectionHandle::enqueue_send`] on it.  When the hub drops the
//!   handle the queue closes, and the connection winds itself down.
//! - [`Connection`] owns the receiving end and runs the two activities for
//!   the peer: a **reader** task that pumps inbound frames purely to notice
//!   when the peer goes away, and a **writer** that drains the queue one
//!   payload at a time.
//!
//! # Close contract
//!
//! Whichever activity ends first (peer close, read error, write error,
//! keepalive timeout, queue closed by the hub), [`Connection::run`] leaves
//! its loop through a single exit path that stops the reader, unregisters
//! from the hub and closes the socket.  That exit path is reached once, so
//! the socket is closed once and the hub sees one unregister, no matter how
//! many things failed at the same time.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ConnectionIoError;
use crate::hub::Hub;
use crate::transport::{FrameSink, FrameSource};

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default upper bound for a single frame write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Identity ──────────────────────────────────────────────────────────────────

/// Opaque identity of one accepted connection.
///
/// It carries no user identity; it only tells connections apart inside the
/// hub's membership set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a fresh, random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

/// Ping/pong liveness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// How often the writer sends a ping frame.
    pub ping_interval: Duration,
    /// How long the peer may stay completely silent before it is dropped.
    /// Only enforced once a ping has gone out unanswered.
    pub pong_wait: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
        }
    }
}

/// Per-connection runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Upper bound for one frame write (payload or ping).
    pub write_timeout: Duration,
    /// Keepalive settings; `None` disables pings entirely.
    pub keepalive: Option<Keepalive>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            keepalive: Some(Keepalive::default()),
        }
    }
}

// ── Close reason ──────────────────────────────────────────────────────────────

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the socket (or sent a Close frame).
    PeerClosed,
    /// Reading from the socket failed.
    ReadFailed(ConnectionIoError),
    /// Writing to the socket failed or timed out.
    WriteFailed(ConnectionIoError),
    /// The outbound queue was closed, i.e. the hub dropped this connection.
    Dropped,
    /// The peer stayed silent for longer than the pong wait.
    KeepaliveTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::ReadFailed(e) => write!(f, "{e}"),
            Self::WriteFailed(e) => write!(f, "{e}"),
            Self::Dropped => f.write_str("dropped by the hub"),
            Self::KeepaliveTimeout => f.write_str("keepalive timed out"),
        }
    }
}

// ── Handle (hub side) ─────────────────────────────────────────────────────────

/// The hub's view of a connection: its id and the sending end of its
/// outbound queue.
///
/// Deliberately not `Clone`: the hub holds the only sender, so dropping the
/// handle is what closes the queue.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    /// The connection this handle belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Hands `payload` to the connection's writer without waiting.
    ///
    /// Returns `false` if the queue is full or the writer has gone away.
    /// Either way the caller must treat the connection as unhealthy.
    pub fn enqueue_send(&self, payload: Bytes) -> bool {
        self.outbound.try_send(payload).is_ok()
    }

    /// Liveness flag: `true` while the writer is still draining the queue.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// Builds a handle and the matching queue receiver.
pub(crate) fn outbound_queue(
    id: ConnectionId,
    capacity: usize,
) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
    // `mpsc::channel` panics on zero capacity.
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ConnectionHandle { id, outbound: tx }, rx)
}

// ── Connection (socket side) ──────────────────────────────────────────────────

/// One accepted peer, ready to be run.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Receiver<Bytes>,
}

impl Connection {
    /// Creates a connection with a bounded outbound queue of `capacity`
    /// payloads and returns it together with the handle for the hub.
    ///
    /// `peer` is only used in log messages.
    pub fn new(peer: Option<SocketAddr>, capacity: usize) -> (Self, ConnectionHandle) {
        let id = ConnectionId::new();
        let (handle, outbound) = outbound_queue(id, capacity);
        (Self { id, peer, outbound }, handle)
    }

    /// The connection's identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The remote address, if the transport knows it.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Runs the reader and writer until either side ends, then tears the
    /// connection down.
    ///
    /// The reader is spawned as its own task; the writer runs inside this
    /// future.  On exit the reader is aborted, the connection is
    /// unregistered from `hub` and `sink` is closed, each exactly once.
    pub async fn run<K, R>(
        self,
        hub: &Hub,
        mut sink: K,
        source: R,
        options: ConnectionOptions,
    ) -> CloseReason
    where
        K: FrameSink,
        R: FrameSource + 'static,
    {
        let Self {
            id,
            peer,
            mut outbound,
        } = self;
        let label = peer.map_or_else(|| id.to_string(), |addr| addr.to_string());

        // The reader reports "last heard from the peer" through a watch
        // channel; the writer consults it on every keepalive tick.
        let (seen_tx, mut seen_rx) = watch::channel(Instant::now());
        let mut reader = tokio::spawn(read_frames(source, seen_tx));

        let keepalive = options
            .keepalive
            .filter(|k| !k.ping_interval.is_zero());
        let mut ticker = keepalive.and_then(keepalive_ticker);
        if keepalive.is_some() && ticker.is_none() {
            warn!("connection {label}: ping interval too large, keepalive disabled");
        }
        // The peer is only timed out while a ping is outstanding, i.e. it has
        // been silent since the last ping went out.
        let mut pinged = false;

        let reason = loop {
            tokio::select! {
                finished = &mut reader => {
                    break finished.unwrap_or_else(|e| {
                        CloseReason::ReadFailed(ConnectionIoError::Read(e.to_string()))
                    });
                }
                next = outbound.recv() => {
                    let Some(payload) = next else {
                        break CloseReason::Dropped;
                    };
                    if let Err(e) = bounded(options.write_timeout, sink.send_frame(payload)).await {
                        break CloseReason::WriteFailed(e);
                    }
                }
                () = next_tick(&mut ticker) => {
                    let heard_since_ping = seen_rx.has_changed().unwrap_or(false);
                    let last_seen = *seen_rx.borrow_and_update();
                    let pong_wait = keepalive.map_or(Duration::MAX, |k| k.pong_wait);
                    if pinged && !heard_since_ping && last_seen.elapsed() >= pong_wait {
                        break CloseReason::KeepaliveTimeout;
                    }
                    if let Err(e) = bounded(options.write_timeout, sink.send_ping()).await {
                        break CloseReason::WriteFailed(e);
                    }
                    pinged = true;
                }
            }
        };

        // Single exit path: everything below runs once per connection.
        reader.abort();
        if let Err(e) = hub.unregister(id).await {
            warn!("connection {label}: could not unregister: {e}");
        }
        // A peer that stopped reading cannot take a Close frame either, so
        // the close gets the same bound as any other write.  Dropping the
        // sink afterwards releases the socket regardless.
        let closed = bounded(options.write_timeout, async {
            sink.close().await;
            Ok::<(), ConnectionIoError>(())
        })
        .await;
        if let Err(e) = closed {
            debug!("connection {label}: close did not complete: {e}");
        }
        drop(sink);
        debug!("connection {label} closed: {reason}");

        reason
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Reader task body: pump frames until the peer goes away.
async fn read_frames<R: FrameSource>(mut source: R, seen: watch::Sender<Instant>) -> CloseReason {
    loop {
        match source.next_frame().await {
            Some(Ok(_)) => {
                seen.send_replace(Instant::now());
            }
            Some(Err(e)) => return CloseReason::ReadFailed(e),
            None => return CloseReason::PeerClosed,
        }
    }
}

/// Applies the write timeout to one sink operation.
async fn bounded<F>(limit: Duration, write: F) -> Result<(), ConnectionIoError>
where
    F: Future<Output = Result<(), ConnectionIoError>>,
{
    match timeout(limit, write).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionIoError::WriteTimeout(limit)),
    }
}

/// Builds the ping ticker, first tick one interval from now.
///
/// Returns `None` when the interval is so large that computing tick
/// deadlines would overflow `Instant`.
fn keepalive_ticker(keepalive: Keepalive) -> Option<Interval> {
    let now = Instant::now();
    now.checked_add(keepalive.ping_interval.checked_mul(2)?)?;

    let mut ticker = interval_at(now + keepalive.ping_interval, keepalive.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

/// Resolves on the next keepalive tick, or never when keepalive is off.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
