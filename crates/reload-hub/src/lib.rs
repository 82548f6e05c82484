//! # reload-hub
//!
//! The connection hub behind the reload server: it keeps track of every
//! connected browser and fans a single control message (`reload`) out to
//! all of them.
//!
//! This crate has no knowledge of sockets, TLS or WebSocket framing.  The
//! transport layer plugs in through two small traits, [`FrameSink`] and
//! [`FrameSource`], so the whole hub can be driven by in-memory mocks in
//! tests (see [`testing`]).
//!
//! # Architecture overview
//!
//! ```text
//!   console trigger ──broadcast──┐
//!                                ▼
//!   transport adapter ──register──► HubLoop (single task, owns membership)
//!                                │
//!             try_send (never waits) per member
//!                                ▼
//!   Connection: outbound queue ─► writer task ─► FrameSink (socket)
//!               reader task ◄─ FrameSource (socket)
//! ```
//!
//! - **`hub`** – [`Hub`] is a cheap, cloneable handle; [`HubLoop`] is the
//!   single coordination task that owns the membership set.  Nobody else
//!   ever touches the set, so there is no lock.
//! - **`connection`** – [`Connection`] runs the reader and writer for one
//!   peer and guarantees a single close/unregister no matter which side
//!   fails first.
//! - **`transport`** – the traits the socket layer implements.

pub mod connection;
pub mod error;
pub mod hub;
pub mod testing;
pub mod transport;

pub use connection::{
    CloseReason, Connection, ConnectionHandle, ConnectionId, ConnectionOptions, Keepalive,
    DEFAULT_QUEUE_CAPACITY,
};
pub use error::{ConnectionIoError, HubError};
pub use hub::{Hub, HubLoop};
pub use transport::{FrameSink, FrameSource, InboundFrame};
