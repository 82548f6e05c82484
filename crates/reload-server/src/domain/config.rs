//! Server configuration types.
//!
//! [`ServerConfig`] holds every runtime setting.  Build it once at startup
//! (from CLI arguments in `main.rs`, or [`ServerConfig::default`] in tests)
//! and share it behind an `Arc`.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the browser-side reload script tries first (plain `ws://`).
pub const DEFAULT_PORT: u16 = 13221;

/// Port for `wss://` connections from pages served over HTTPS.
pub const DEFAULT_TLS_PORT: u16 = 13222;

/// Path that accepts the WebSocket upgrade.
pub const DEFAULT_UPGRADE_PATH: &str = "/reload";

/// All runtime configuration for the reload server.
///
/// # Example
///
/// ```rust
/// use reload_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.plain_addr.port(), 13221);
/// assert_eq!(cfg.tls_addr.port(), 13222);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address of the plaintext WebSocket listener.
    pub plain_addr: SocketAddr,

    /// Address of the TLS WebSocket listener.
    pub tls_addr: SocketAddr,

    /// Request path that is upgraded; every other path gets a 404.
    pub upgrade_path: String,

    /// Capacity of each connection's outbound queue.  A browser that falls
    /// this many messages behind is dropped.
    pub queue_capacity: usize,

    /// Upper bound for writing one frame to a browser.
    pub write_timeout: Duration,

    /// How often to ping each browser.  Zero disables keepalive.
    pub ping_interval: Duration,

    /// How long a browser may stay silent (no pong, no data) before it is
    /// dropped.  Only used when keepalive is enabled.
    pub pong_wait: Duration,

    /// Largest inbound WebSocket message accepted from a browser, in bytes.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// `true` when periodic pings are enabled.
    pub fn keepalive_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

impl Default for ServerConfig {
    /// Defaults match the ports the browser-side script expects.
    ///
    /// | Field            | Default          |
    /// |------------------|------------------|
    /// | plain_addr       | `0.0.0.0:13221`  |
    /// | tls_addr         | `0.0.0.0:13222`  |
    /// | upgrade_path     | `/reload`        |
    /// | queue_capacity   | 256              |
    /// | write_timeout    | 10 seconds       |
    /// | ping_interval    | 54 seconds       |
    /// | pong_wait        | 60 seconds       |
    /// | max_message_size | 512 bytes        |
    fn default() -> Self {
        Self {
            plain_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            tls_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_TLS_PORT)),
            upgrade_path: DEFAULT_UPGRADE_PATH.to_string(),
            queue_capacity: 256,
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            max_message_size: 512,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        // Arrange / Act
        let cfg = ServerConfig::default();
        // Assert
        assert_eq!(cfg.plain_addr.port(), 13221);
        assert_eq!(cfg.tls_addr.port(), 13222);
    }

    #[test]
    fn test_default_binds_all_interfaces() {
        let cfg = ServerConfig::default();
        assert!(cfg.plain_addr.ip().is_unspecified());
        assert!(cfg.tls_addr.ip().is_unspecified());
    }

    #[test]
    fn test_default_upgrade_path() {
        assert_eq!(ServerConfig::default().upgrade_path, "/reload");
    }

    #[test]
    fn test_keepalive_enabled_by_default() {
        assert!(ServerConfig::default().keepalive_enabled());
    }

    #[test]
    fn test_zero_ping_interval_disables_keepalive() {
        let cfg = ServerConfig {
            ping_interval: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(!cfg.keepalive_enabled());
    }
}
