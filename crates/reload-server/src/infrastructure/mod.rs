//! Infrastructure layer for reload-server.
//!
//! Everything that touches the outside world lives here:
//!
//! - Binding the plaintext and TLS listeners and running their accept loops
//! - Generating and loading the local-development TLS certificate
//! - Performing the WebSocket upgrade and bridging sockets to the hub
//! - Reading operator input from stdin on a dedicated thread
//!
//! # What does NOT belong here?
//!
//! - Deciding when to reload (application layer)
//! - Connection membership and fan-out (the `reload-hub` crate)

pub mod console;
pub mod error;
pub mod listener;
pub mod tls;
pub mod ws_transport;

pub use console::spawn_line_reader;
pub use error::{ListenerError, UpgradeError};
pub use listener::{
    run_listeners, run_plain_listener, run_tls_listener, serve_plain, ListenerOutcome,
};
pub use ws_transport::handle_upgrade;
