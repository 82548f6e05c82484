//! Listeners: plaintext `ws://` and TLS `wss://` accept loops.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on each configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Handing each connection to its own Tokio task, which (for TLS, after
//!    the TLS handshake) runs [`handle_upgrade`] and logs how it ended.
//! 4. Stopping when the shared `running` flag is cleared.
//!
//! # Why poll with a timeout?
//!
//! `accept()` would otherwise block until the next browser shows up, so a
//! shutdown request could go unnoticed indefinitely.  Each accept is bounded
//! by [`ACCEPT_POLL`] and the flag is checked in between.
//!
//! A failing connection never affects the listener: its error is logged and
//! the loop moves on.  Only a failure to *start* (bind, TLS setup) is
//! returned to the caller.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use reload_hub::{CloseReason, Hub};

use crate::domain::ServerConfig;
use crate::infrastructure::error::{ListenerError, UpgradeError};
use crate::infrastructure::tls::{load_acceptor, CertFiles};
use crate::infrastructure::ws_transport::handle_upgrade;

/// Longest single wait on `accept()` before the `running` flag is rechecked.
pub const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds a TCP listener on `addr`.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })
}

/// Binds `config.plain_addr` and serves `ws://` upgrades until `running`
/// is cleared.
///
/// # Errors
///
/// Returns [`ListenerError::Bind`] if the address cannot be bound (port in
/// use, missing permission).
pub async fn run_plain_listener(
    hub: Hub,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) -> Result<(), ListenerError> {
    let listener = bind(config.plain_addr).await?;
    info!(
        "listening for ws:// on {}{}",
        config.plain_addr, config.upgrade_path
    );

    serve_plain(listener, hub, config, running).await;
    Ok(())
}

/// Serves `ws://` upgrades on an already-bound listener.
///
/// Split out from [`run_plain_listener`] so tests can bind port 0 and learn
/// the real address first.
pub async fn serve_plain(
    listener: TcpListener,
    hub: Hub,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    accept_loop(&listener, &running, |stream, peer| {
        let hub = hub.clone();
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            let outcome = handle_upgrade(stream, peer, hub, config).await;
            log_outcome(peer, outcome);
        });
    })
    .await;
}

/// Generates the local certificate, binds `config.tls_addr` and serves
/// `wss://` upgrades until `running` is cleared.
///
/// The certificate files live in a temporary directory for as long as this
/// listener runs and are removed when it returns.
///
/// # Errors
///
/// Returns [`ListenerError::Tls`] if the certificate cannot be generated or
/// loaded, or [`ListenerError::Bind`] if the address cannot be bound.
pub async fn run_tls_listener(
    hub: Hub,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) -> Result<(), ListenerError> {
    let cert_files = CertFiles::generate()?;
    let acceptor = load_acceptor(cert_files.cert_path(), cert_files.key_path())?;
    let listener = bind(config.tls_addr).await?;
    info!(
        "listening for wss:// on {}{} (self-signed certificate in {})",
        config.tls_addr,
        config.upgrade_path,
        cert_files.dir().display()
    );

    serve_tls(listener, acceptor, hub, config, running).await;

    // `TempDir` deletes the directory on drop; keep it until the listener is
    // done so the files exist for as long as the certificate is in use.
    drop(cert_files);
    Ok(())
}

/// Serves `wss://` upgrades on an already-bound listener.
pub async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    hub: Hub,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    accept_loop(&listener, &running, |stream, peer| {
        let acceptor = acceptor.clone();
        let hub = hub.clone();
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            // The TLS handshake runs inside the per-connection task, so a
            // client that stalls mid-handshake only ties up its own task.
            let outcome = match acceptor.accept(stream).await {
                Ok(tls_stream) => handle_upgrade(tls_stream, peer, hub, config).await,
                Err(e) => Err(UpgradeError::TlsHandshake(e)),
            };
            log_outcome(peer, outcome);
        });
    })
    .await;
}

// ── Supervision ───────────────────────────────────────────────────────────────

/// Which listeners managed to start and serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOutcome {
    /// The `ws://` listener ran until shutdown.
    pub plain: bool,
    /// The `wss://` listener ran until shutdown.
    pub tls: bool,
}

impl ListenerOutcome {
    /// `true` if at least one listener ran.  The process only counts as
    /// failed when neither did.
    pub fn any_ran(&self) -> bool {
        self.plain || self.tls
    }
}

/// Runs both listeners side by side and waits for both to finish.
///
/// A listener that fails to start is logged and does not affect the other
/// one: pages served over plain HTTP still get reloads when the TLS port is
/// taken, and vice versa.
pub async fn run_listeners<P, T>(plain: P, tls: T) -> ListenerOutcome
where
    P: Future<Output = Result<(), ListenerError>> + Send + 'static,
    T: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    // Each listener gets its own task so a slow TLS setup never delays the
    // plaintext port (and the other way around).
    let plain = spawn_listener("ws://", plain);
    let tls = spawn_listener("wss://", tls);

    ListenerOutcome {
        plain: join_listener("ws://", plain).await,
        tls: join_listener("wss://", tls).await,
    }
}

/// Spawns one listener, logging a startup failure instead of propagating
/// it.  The task resolves to `true` if the listener ran.
fn spawn_listener<F>(scheme: &'static str, listener: F) -> JoinHandle<bool>
where
    F: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    tokio::spawn(async move {
        match listener.await {
            Ok(()) => true,
            Err(e) => {
                error!("{scheme} listener failed: {e}");
                false
            }
        }
    })
}

async fn join_listener(scheme: &'static str, task: JoinHandle<bool>) -> bool {
    task.await.unwrap_or_else(|e| {
        error!("{scheme} listener task panicked: {e}");
        false
    })
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepts connections until `running` is cleared, passing each one to
/// `on_accept`.  `on_accept` must not block; it spawns.
async fn accept_loop<F>(listener: &TcpListener, running: &AtomicBool, mut on_accept: F)
where
    F: FnMut(TcpStream, SocketAddr),
{
    loop {
        // Check the shutdown flag before each accept attempt.  `Relaxed` is
        // enough: the flag only needs to be seen eventually, nothing else is
        // published through it.
        if !running.load(Ordering::Relaxed) {
            let addr = listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string());
            info!("shutdown flag set; stopping accept loop on {addr}");
            break;
        }

        // Without the timeout the loop would sit in `accept()` until the next
        // browser connects and never see the flag change.
        match timeout(ACCEPT_POLL, listener.accept()).await {
            // `on_accept` spawns a task per connection and returns at once,
            // so one slow browser never delays the next accept.
            Ok(Ok((stream, peer))) => on_accept(stream, peer),
            Ok(Err(e)) => {
                // Transient (e.g. too many open files); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {
                // No connection in the last poll interval; recheck the flag.
            }
        }
    }
}

fn log_outcome(peer: SocketAddr, outcome: Result<CloseReason, UpgradeError>) {
    match outcome {
        Ok(reason) => info!("browser {peer} disconnected: {reason}"),
        Err(e) => warn!("rejected connection from {peer}: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use futures_util::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config() -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            plain_addr: "127.0.0.1:0".parse().unwrap(),
            tls_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        })
    }

    async fn wait_for_members(hub: &Hub, expected: usize) {
        let mut members = hub.members();
        timeout(WAIT, members.wait_for(|n| *n == expected))
            .await
            .unwrap()
            .unwrap();
    }

    async fn spawn_plain(hub: &Hub) -> (SocketAddr, Arc<AtomicBool>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(serve_plain(
            listener,
            hub.clone(),
            test_config(),
            Arc::clone(&running),
        ));
        (addr, running, task)
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        // Arrange
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        // Act
        let result = bind(addr).await;

        // Assert
        assert!(matches!(result, Err(ListenerError::Bind { addr: a, .. }) if a == addr));
    }

    #[tokio::test]
    async fn test_accept_loop_stops_when_flag_cleared() {
        let (hub, _hub_task) = Hub::spawn();
        let (_addr, running, task) = spawn_plain(&hub).await;

        running.store(false, Ordering::Relaxed);

        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_plain_http_request_does_not_stop_listener() {
        // Arrange
        let (hub, _hub_task) = Hub::spawn();
        let (addr, _running, _task) = spawn_plain(&hub).await;

        // Act: a request with no upgrade headers; the server hangs up
        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"GET /reload HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut reply = Vec::new();
        let _ = timeout(WAIT, raw.read_to_end(&mut reply)).await.unwrap();

        // Assert: turned away with a 400, and a proper client still gets
        // through afterwards
        assert!(reply.starts_with(b"HTTP/1.1 400"));
        let url = format!("ws://{addr}/reload");
        let (_ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        wait_for_members(&hub, 1).await;
    }

    #[tokio::test]
    async fn test_tls_listener_delivers_reload() {
        // Arrange: server with a freshly generated certificate
        let (hub, _hub_task) = Hub::spawn();
        let files = CertFiles::generate().unwrap();
        let acceptor = load_acceptor(files.cert_path(), files.key_path()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(serve_tls(
            listener,
            acceptor,
            hub.clone(),
            test_config(),
            Arc::clone(&running),
        ));

        // Client that trusts exactly that certificate
        let mut roots = rustls::RootCertStore::empty();
        let pem = fs::read(files.cert_path()).unwrap();
        for cert in rustls_pemfile::certs(&mut &pem[..]) {
            roots.add(cert.unwrap()).unwrap();
        }
        let client_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
        let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();

        let tcp = TcpStream::connect(addr).await.unwrap();
        let tls = connector.connect(server_name, tcp).await.unwrap();
        let (mut ws, _) = tokio_tungstenite::client_async("wss://localhost/reload", tls)
            .await
            .unwrap();
        wait_for_members(&hub, 1).await;

        // Act
        hub.broadcast(&b"reload"[..]).await.unwrap();

        // Assert
        let msg = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(msg, WsMessage::Text("reload".to_string()));
    }

    #[tokio::test]
    async fn test_failed_tls_handshake_does_not_stop_listener() {
        let (hub, _hub_task) = Hub::spawn();
        let files = CertFiles::generate().unwrap();
        let acceptor = load_acceptor(files.cert_path(), files.key_path()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(serve_tls(
            listener,
            acceptor,
            hub.clone(),
            test_config(),
            Arc::clone(&running),
        ));

        // Plain HTTP on the TLS port
        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"GET /reload HTTP/1.1\r\n\r\n").await.unwrap();
        let mut sink = Vec::new();
        let _ = timeout(WAIT, raw.read_to_end(&mut sink)).await.unwrap();

        assert!(!task.is_finished());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_one_taken_port_leaves_the_other_listener_running() {
        // Arrange: something already holds the ws:// port
        let (hub, _hub_task) = Hub::spawn();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Arc::new(ServerConfig {
            plain_addr: taken.local_addr().unwrap(),
            tls_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        });
        let running = Arc::new(AtomicBool::new(true));

        // Act
        let task = tokio::spawn(run_listeners(
            run_plain_listener(hub.clone(), Arc::clone(&config), Arc::clone(&running)),
            run_tls_listener(hub.clone(), Arc::clone(&config), Arc::clone(&running)),
        ));
        tokio::time::sleep(ACCEPT_POLL * 3).await;

        // Assert: the TLS listener keeps the process alive
        assert!(!task.is_finished());
        running.store(false, Ordering::Relaxed);
        let outcome = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(outcome, ListenerOutcome { plain: false, tls: true });
        assert!(outcome.any_ran());
    }

    #[tokio::test]
    async fn test_both_ports_taken_reports_nothing_ran() {
        // Arrange
        let (hub, _hub_task) = Hub::spawn();
        let taken_plain = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_tls = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Arc::new(ServerConfig {
            plain_addr: taken_plain.local_addr().unwrap(),
            tls_addr: taken_tls.local_addr().unwrap(),
            ..ServerConfig::default()
        });
        let running = Arc::new(AtomicBool::new(true));

        // Act: the flag stays set, both listeners must still give up
        let outcome = timeout(
            WAIT,
            run_listeners(
                run_plain_listener(hub.clone(), Arc::clone(&config), Arc::clone(&running)),
                run_tls_listener(hub.clone(), Arc::clone(&config), Arc::clone(&running)),
            ),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(outcome, ListenerOutcome { plain: false, tls: false });
        assert!(!outcome.any_ran());
    }
}
