//! Domain layer for reload-server.
//!
//! Plain data only: no `tokio`, no sockets, no environment reads.  The
//! binary fills [`ServerConfig`] from CLI arguments; tests build it directly.

pub mod config;
pub mod message;

pub use config::ServerConfig;
pub use message::RELOAD_MESSAGE;
