//! Reload server: entry point.
//!
//! Keeps a WebSocket open to every browser tab running the reload script and
//! tells all of them to reload whenever the operator presses Enter in this
//! terminal.
//!
//! # Usage
//!
//! ```text
//! reload-server [OPTIONS]
//!
//! Options:
//!   --bind             <IP>    Interface for both listeners [default: 0.0.0.0]
//!   --port             <PORT>  Plaintext ws:// port [default: 13221]
//!   --tls-port         <PORT>  TLS wss:// port [default: 13222]
//!   --path             <PATH>  Upgrade path [default: /reload]
//!   --queue-capacity   <N>     Per-browser outbound queue [default: 256]
//!   --write-timeout    <SECS>  Per-frame write timeout [default: 10]
//!   --ping-interval    <SECS>  Keepalive ping interval, 0 disables [default: 54]
//!   --pong-wait        <SECS>  Silence before a browser is dropped [default: 60]
//!   --max-message-size <BYTES> Largest inbound message [default: 512]
//! ```
//!
//! # Environment variable overrides
//!
//! Every option can also be set through the environment.  CLI args take
//! precedence when both are present.
//!
//! | Variable                  | Default   |
//! |---------------------------|-----------|
//! | `RELOAD_BIND`             | `0.0.0.0` |
//! | `RELOAD_PORT`             | `13221`   |
//! | `RELOAD_TLS_PORT`         | `13222`   |
//! | `RELOAD_PATH`             | `/reload` |
//! | `RELOAD_QUEUE_CAPACITY`   | `256`     |
//! | `RELOAD_WRITE_TIMEOUT`    | `10`      |
//! | `RELOAD_PING_INTERVAL`    | `54`      |
//! | `RELOAD_PONG_WAIT`        | `60`      |
//! | `RELOAD_MAX_MESSAGE_SIZE` | `512`     |
//!
//! # Architecture overview
//!
//! ```text
//! Browser tabs  (ws://host:13221/reload, wss://host:13222/reload)
//!       ↕
//! reload-server  ← this process
//!   domain/          ServerConfig, reload message
//!   application/     console line → broadcast
//!   infrastructure/
//!     listener/      plaintext + TLS accept loops
//!     ws_transport/  WebSocket upgrade, FrameSink/FrameSource
//!     console/       stdin reader thread
//!       ↕
//! reload-hub  (membership + fan-out)
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reload_hub::Hub;
use reload_server::application::run_console_trigger;
use reload_server::domain::config::{DEFAULT_PORT, DEFAULT_TLS_PORT, DEFAULT_UPGRADE_PATH};
use reload_server::domain::ServerConfig;
use reload_server::infrastructure::{
    run_listeners, run_plain_listener, run_tls_listener, spawn_line_reader,
};

/// Longest keepalive interval or pong wait accepted on the command line:
/// one day.  Anything longer is indistinguishable from disabling keepalive.
const MAX_KEEPALIVE_SECS: u64 = 24 * 60 * 60;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Browser live-reload server.
///
/// Press Enter to make every connected browser reload.
#[derive(Debug, Parser)]
#[command(
    name = "reload-server",
    about = "Tells connected browsers to reload when you press Enter",
    version
)]
struct Cli {
    /// IP address both listeners bind to.
    ///
    /// Use `127.0.0.1` to accept only local browsers.
    #[arg(long, default_value = "0.0.0.0", env = "RELOAD_BIND")]
    bind: String,

    /// Port of the plaintext `ws://` listener.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "RELOAD_PORT")]
    port: u16,

    /// Port of the TLS `wss://` listener.
    #[arg(long, default_value_t = DEFAULT_TLS_PORT, env = "RELOAD_TLS_PORT")]
    tls_port: u16,

    /// Request path that accepts the WebSocket upgrade.
    #[arg(long, default_value = DEFAULT_UPGRADE_PATH, env = "RELOAD_PATH")]
    path: String,

    /// Outbound messages buffered per browser before it is dropped as too
    /// slow.
    #[arg(long, default_value_t = 256, env = "RELOAD_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Seconds allowed for writing one frame to a browser.
    #[arg(long, default_value_t = 10, env = "RELOAD_WRITE_TIMEOUT")]
    write_timeout: u64,

    /// Seconds between keepalive pings.  `0` disables keepalive.
    #[arg(long, default_value_t = 54, env = "RELOAD_PING_INTERVAL")]
    ping_interval: u64,

    /// Seconds a browser may stay silent before it is dropped.
    #[arg(long, default_value_t = 60, env = "RELOAD_PONG_WAIT")]
    pong_wait: u64,

    /// Largest inbound WebSocket message, in bytes.
    #[arg(long, default_value_t = 512, env = "RELOAD_MAX_MESSAGE_SIZE")]
    max_message_size: usize,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not an IP address, `--queue-capacity`
    /// is zero or `--path` does not start with `/`.  With keepalive on,
    /// `--pong-wait` must be longer than `--ping-interval` (otherwise a quiet
    /// browser is dropped before it could answer a ping) and neither may
    /// exceed one day.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: '{}'", self.bind))?;

        if self.queue_capacity == 0 {
            bail!("--queue-capacity must be at least 1");
        }
        if !self.path.starts_with('/') {
            bail!("--path must start with '/', got '{}'", self.path);
        }
        if self.ping_interval > 0 {
            if self.ping_interval > MAX_KEEPALIVE_SECS || self.pong_wait > MAX_KEEPALIVE_SECS {
                bail!("--ping-interval and --pong-wait must not exceed {MAX_KEEPALIVE_SECS} seconds");
            }
            if self.pong_wait <= self.ping_interval {
                bail!(
                    "--pong-wait ({}) must be longer than --ping-interval ({})",
                    self.pong_wait,
                    self.ping_interval
                );
            }
        }

        Ok(ServerConfig {
            plain_addr: SocketAddr::new(ip, self.port),
            tls_addr: SocketAddr::new(ip, self.tls_port),
            upgrade_path: self.path,
            queue_capacity: self.queue_capacity,
            write_timeout: Duration::from_secs(self.write_timeout),
            ping_interval: Duration::from_secs(self.ping_interval),
            pong_wait: Duration::from_secs(self.pong_wait),
            max_message_size: self.max_message_size,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. Logging is initialised; `RUST_LOG` controls the level (default `info`).
/// 2. CLI arguments are parsed into a [`ServerConfig`].
/// 3. The hub task is spawned.
/// 4. A Ctrl+C handler clears the shared `running` flag.
/// 5. Both listeners start in their own tasks.  One failing to start is
///    logged; the process only gives up if neither can start.
/// 6. A stdin reader feeds the console trigger: one line, one reload.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    // `EnvFilter::try_from_default_env()` reads the `RUST_LOG` environment
    // variable (e.g. `RUST_LOG=debug`).  When it is unset we fall back to
    // `info`, which shows connections coming and going without per-frame
    // noise.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Parse CLI arguments ───────────────────────────────────────────────────
    // `Cli::parse()` reads from `std::env::args()` (and the `RELOAD_*`
    // variables).  On `--help` or a bad argument it prints a message and
    // exits the process itself.
    //
    // The config is wrapped in an `Arc` (atomically reference-counted
    // pointer) so every listener and connection task can share one
    // read-only copy without cloning the strings inside it.
    let config = Arc::new(Cli::parse().into_server_config()?);

    info!(
        "reload server starting: ws={}, wss={}, path={}",
        config.plain_addr, config.tls_addr, config.upgrade_path
    );

    // ── Hub ───────────────────────────────────────────────────────────────────
    // `Hub` is a cheap handle around a channel sender; cloning it gives each
    // task its own way to reach the single hub loop.
    let (hub, _hub_task) = Hub::spawn();

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    // `AtomicBool` is a thread-safe boolean.  The accept loops read it every
    // poll interval; the Ctrl+C task below is the only writer.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    // `tokio::signal::ctrl_c()` resolves once the user presses Ctrl+C.  It
    // runs in its own task so the rest of `main` never has to poll for it.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Listeners ─────────────────────────────────────────────────────────────
    // `run_listeners` drives both accept loops and only returns once both
    // have stopped.  Spawning it lets `main` carry on and start the console
    // trigger in the meantime.
    let listeners = tokio::spawn(run_listeners(
        run_plain_listener(hub.clone(), Arc::clone(&config), Arc::clone(&running)),
        run_tls_listener(hub.clone(), Arc::clone(&config), Arc::clone(&running)),
    ));

    // ── Console trigger ───────────────────────────────────────────────────────
    // Reading stdin blocks, so the reader lives on a plain OS thread and
    // hands lines over through a channel.
    let lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
        .context("failed to start console reader")?;
    let trigger_hub = hub.clone();
    tokio::spawn(async move {
        match run_console_trigger(lines, trigger_hub).await {
            Ok(sent) => info!("console trigger finished after {sent} reload(s)"),
            Err(e) => error!("console trigger stopped: {e}"),
        }
    });

    info!("Press Enter to reload the browser!");

    let outcome = listeners.await.context("listener supervisor panicked")?;
    if !outcome.any_ran() {
        bail!("no listener could be started");
    }

    info!("reload server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn default_cli() -> Cli {
        Cli::parse_from(["reload-server"])
    }

    #[test]
    fn test_cli_defaults_produce_correct_ports() {
        // Arrange: parse with no arguments (all defaults apply)
        let cli = default_cli();

        // Assert
        assert_eq!(cli.port, 13221);
        assert_eq!(cli.tls_port, 13222);
    }

    #[test]
    fn test_cli_defaults_produce_correct_bind() {
        assert_eq!(default_cli().bind, "0.0.0.0");
    }

    #[test]
    fn test_cli_defaults_produce_correct_path() {
        assert_eq!(default_cli().path, "/reload");
    }

    #[test]
    fn test_cli_defaults_produce_correct_keepalive() {
        let cli = default_cli();
        assert_eq!(cli.ping_interval, 54);
        assert_eq!(cli.pong_wait, 60);
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["reload-server", "--port", "9999"]);
        assert_eq!(cli.port, 9999);
    }

    #[test]
    fn test_cli_tls_port_override() {
        let cli = Cli::parse_from(["reload-server", "--tls-port", "9443"]);
        assert_eq!(cli.tls_port, 9443);
    }

    #[test]
    fn test_cli_queue_capacity_override() {
        let cli = Cli::parse_from(["reload-server", "--queue-capacity", "8"]);
        assert_eq!(cli.queue_capacity, 8);
    }

    #[test]
    fn test_into_server_config_defaults_match_server_config_default() {
        // Arrange
        let cli = default_cli();

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_into_server_config_applies_bind_to_both_listeners() {
        let cli = Cli::parse_from(["reload-server", "--bind", "127.0.0.1"]);

        let config = cli.into_server_config().unwrap();

        assert_eq!(config.plain_addr.to_string(), "127.0.0.1:13221");
        assert_eq!(config.tls_addr.to_string(), "127.0.0.1:13222");
    }

    #[test]
    fn test_into_server_config_accepts_ipv6_bind() {
        let cli = Cli::parse_from(["reload-server", "--bind", "::1"]);

        let config = cli.into_server_config().unwrap();

        assert_eq!(config.plain_addr.to_string(), "[::1]:13221");
    }

    #[test]
    fn test_into_server_config_durations() {
        let cli = Cli::parse_from([
            "reload-server",
            "--write-timeout",
            "3",
            "--ping-interval",
            "0",
            "--pong-wait",
            "7",
        ]);

        let config = cli.into_server_config().unwrap();

        assert_eq!(config.write_timeout, Duration::from_secs(3));
        assert!(!config.keepalive_enabled());
        assert_eq!(config.pong_wait, Duration::from_secs(7));
    }

    #[test]
    fn test_into_server_config_invalid_bind_returns_error() {
        // Arrange
        let cli = Cli::parse_from(["reload-server", "--bind", "not.an.ip"]);

        // Act
        let result = cli.into_server_config();

        // Assert: must return an error, not panic
        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_zero_queue_capacity_returns_error() {
        let cli = Cli::parse_from(["reload-server", "--queue-capacity", "0"]);
        assert!(cli.into_server_config().is_err());
    }

    #[test]
    fn test_into_server_config_pong_wait_not_longer_than_ping_returns_error() {
        // Arrange: a browser would be dropped before its first ping
        let cli = Cli::parse_from(["reload-server", "--ping-interval", "54", "--pong-wait", "30"]);

        // Act
        let result = cli.into_server_config();

        // Assert
        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_equal_ping_and_pong_returns_error() {
        let cli = Cli::parse_from(["reload-server", "--ping-interval", "60", "--pong-wait", "60"]);
        assert!(cli.into_server_config().is_err());
    }

    #[test]
    fn test_into_server_config_huge_ping_interval_returns_error() {
        // Arrange: u64::MAX seconds would overflow `Instant` arithmetic
        let cli = Cli::parse_from([
            "reload-server",
            "--ping-interval",
            "18446744073709551615",
            "--pong-wait",
            "18446744073709551615",
        ]);

        // Act
        let result = cli.into_server_config();

        // Assert: rejected up front, never reaches the timers
        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_pong_wait_ignored_when_keepalive_disabled() {
        let cli = Cli::parse_from(["reload-server", "--ping-interval", "0", "--pong-wait", "1"]);
        assert!(cli.into_server_config().is_ok());
    }

    #[test]
    fn test_into_server_config_one_day_keepalive_is_accepted() {
        let cli = Cli::parse_from([
            "reload-server",
            "--ping-interval",
            "86399",
            "--pong-wait",
            "86400",
        ]);

        let config = cli.into_server_config().unwrap();

        assert_eq!(config.pong_wait, Duration::from_secs(MAX_KEEPALIVE_SECS));
    }

    #[test]
    fn test_into_server_config_relative_path_returns_error() {
        let cli = Cli::parse_from(["reload-server", "--path", "reload"]);
        assert!(cli.into_server_config().is_err());
    }
}
