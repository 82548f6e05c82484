//! reload-server library crate.
//!
//! Tells every connected browser to reload when the operator presses Enter.
//! Browsers connect over WebSocket on two ports (plaintext and TLS); the
//! connection bookkeeping and fan-out live in the `reload-hub` crate.
//!
//! # Architecture
//!
//! ```text
//! stdin (Enter) ──► application::run_console_trigger ──► Hub::broadcast
//!                                                          │
//! Browser ◄── WebSocket ◄── infrastructure::ws_transport ◄─┘
//!                               ▲
//!                 infrastructure::listener (13221 plain, 13222 TLS)
//! ```
//!
//! - `domain` has no I/O: the configuration struct and the reload message.
//! - `application` turns console lines into broadcasts.
//! - `infrastructure` owns every socket, the TLS material and the stdin
//!   reader thread.

/// Domain layer: configuration and the reload message (no I/O).
pub mod domain;

/// Application layer: console trigger → hub broadcast.
pub mod application;

/// Infrastructure layer: listeners, WebSocket adapter, TLS, stdin.
pub mod infrastructure;
