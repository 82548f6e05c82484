//! TLS material for the `wss://` listener.
//!
//! Pages served over HTTPS can only open `wss://` sockets, so the server
//! also listens with TLS.  This is a local development convenience, not a
//! security boundary: at startup a self-signed certificate for `localhost`
//! is generated, written as PEM into a fresh temporary directory, and
//! loaded back into a `rustls` acceptor.  Nobody supplies or verifies it;
//! the developer accepts it once in the browser.
//!
//! The temporary directory (and both files) is removed when the
//! [`CertFiles`] value is dropped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::CertifiedKey;
use tempfile::TempDir;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::infrastructure::error::ListenerError;

/// File name of the generated certificate inside the temporary directory.
pub const CERT_FILE_NAME: &str = "reload-cert.pem";

/// File name of the generated private key inside the temporary directory.
pub const KEY_FILE_NAME: &str = "reload-key.pem";

/// Names the certificate is valid for.
const SUBJECT_ALT_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// A generated certificate/key pair on disk.
#[derive(Debug)]
pub struct CertFiles {
    dir: TempDir,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CertFiles {
    /// Generates a self-signed `localhost` certificate and writes it, with
    /// its private key, to a new temporary directory.
    pub fn generate() -> Result<Self, ListenerError> {
        let names: Vec<String> = SUBJECT_ALT_NAMES.iter().map(|s| s.to_string()).collect();
        let CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(names)
            .map_err(|e| ListenerError::Tls(format!("failed to generate certificate: {e}")))?;

        let dir = tempfile::Builder::new()
            .prefix("reload-server")
            .tempdir()
            .map_err(|e| ListenerError::Tls(format!("failed to create temporary directory: {e}")))?;

        let cert_path = dir.path().join(CERT_FILE_NAME);
        let key_path = dir.path().join(KEY_FILE_NAME);

        fs::write(&cert_path, cert.pem()).map_err(|e| {
            ListenerError::Tls(format!("failed to write '{}': {e}", cert_path.display()))
        })?;
        fs::write(&key_path, key_pair.serialize_pem()).map_err(|e| {
            ListenerError::Tls(format!("failed to write '{}': {e}", key_path.display()))
        })?;

        debug!("wrote TLS certificate to {}", dir.path().display());

        Ok(Self {
            dir,
            cert_path,
            key_path,
        })
    }

    /// Directory holding both files.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the PEM certificate.
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Path of the PEM private key.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

/// Loads a PEM certificate chain and private key into a TLS acceptor.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ListenerError> {
    let cert_pem = fs::read(cert_path).map_err(|e| {
        ListenerError::Tls(format!("failed to read cert '{}': {e}", cert_path.display()))
    })?;
    let key_pem = fs::read(key_path).map_err(|e| {
        ListenerError::Tls(format!("failed to read key '{}': {e}", key_path.display()))
    })?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ListenerError::Tls(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(ListenerError::Tls(format!(
            "no certificate found in '{}'",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ListenerError::Tls(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ListenerError::Tls("no private key found".to_string()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ListenerError::Tls(format!("unsupported protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ListenerError::Tls(format!("invalid TLS config: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
