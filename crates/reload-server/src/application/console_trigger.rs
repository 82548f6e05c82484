//! Console trigger: every line the operator enters becomes one reload.
//!
//! Lines arrive on a channel fed by the stdin reader thread (see
//! `infrastructure::console`).  The content of the line is ignored; pressing
//! Enter on an empty line is the normal case.

use std::io;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use reload_hub::{Hub, HubError};

use crate::domain::RELOAD_MESSAGE;

/// Failure that stops the console trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Reading the console failed.
    #[error("failed to read from the console: {0}")]
    Read(#[from] io::Error),

    /// The hub is gone, so there is nobody left to notify.
    #[error("cannot broadcast reload: {0}")]
    Hub(#[from] HubError),
}

/// The reload payload: [`RELOAD_MESSAGE`] with surrounding whitespace trimmed.
pub fn reload_payload() -> Bytes {
    Bytes::from_static(RELOAD_MESSAGE.trim().as_bytes())
}

/// Broadcasts one reload per console line until the console closes.
///
/// Returns the number of reloads sent.  End of input is not an error: the
/// listeners keep serving, there is just no way left to trigger a reload.
pub async fn run_console_trigger(
    mut lines: mpsc::Receiver<io::Result<String>>,
    hub: Hub,
) -> Result<u64, TriggerError> {
    let mut sent = 0;

    while let Some(line) = lines.recv().await {
        line?;
        info!(
            "reloading browsers ({} connected)",
            hub.connection_count()
        );
        hub.broadcast(reload_payload()).await?;
        sent += 1;
    }

    info!("console input closed; no further reloads can be triggered");
    Ok(sent)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use reload_hub::testing::{MockSink, MockSource};
    use reload_hub::{Connection, ConnectionOptions};

    use super::*;

    #[test]
    fn test_reload_payload_is_trimmed_literal() {
        assert_eq!(reload_payload(), Bytes::from_static(b"reload"));
    }

    #[tokio::test]
    async fn test_each_line_broadcasts_one_reload() {
        // Arrange: one connected browser
        let (hub, _hub_task) = Hub::spawn();
        let (connection, handle) = Connection::new(None, 8);
        hub.register(handle).await.unwrap();
        let (sink, mut recorder) = MockSink::new();
        let (source, _control) = MockSource::new();
        let runner = hub.clone();
        tokio::spawn(async move {
            let options = ConnectionOptions {
                keepalive: None,
                ..ConnectionOptions::default()
            };
            connection.run(&runner, sink, source, options).await
        });

        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(String::new())).await.unwrap();
        tx.send(Ok("anything typed is ignored".to_string()))
            .await
            .unwrap();
        drop(tx);

        // Act
        let sent = run_console_trigger(rx, hub.clone()).await.unwrap();

        // Assert
        assert_eq!(sent, 2);
        let frames = timeout(Duration::from_secs(2), recorder.wait_for_frames(2))
            .await
            .unwrap();
        assert_eq!(frames, vec![reload_payload(), reload_payload()]);
    }

    #[tokio::test]
    async fn test_end_of_input_is_not_an_error() {
        let (hub, _hub_task) = Hub::spawn();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        let sent = run_console_trigger(rx, hub).await.unwrap();

        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_read_error_stops_trigger() {
        let (hub, _hub_task) = Hub::spawn();
        let (tx, rx) = mpsc::channel(1);
        tx.send(Err(io::Error::new(io::ErrorKind::Other, "tty gone")))
            .await
            .unwrap();

        let result = run_console_trigger(rx, hub).await;

        assert!(matches!(result, Err(TriggerError::Read(_))));
    }

    #[tokio::test]
    async fn test_stopped_hub_is_reported() {
        let (hub, hub_loop) = Hub::new();
        drop(hub_loop);
        let (tx, rx) = mpsc::channel(1);
        tx.send(Ok(String::new())).await.unwrap();

        let result = run_console_trigger(rx, hub).await;

        assert!(matches!(result, Err(TriggerError::Hub(HubError::Stopped))));
    }
}
