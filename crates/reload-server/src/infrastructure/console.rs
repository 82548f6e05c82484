//! Operator console input.
//!
//! Lines are read on a dedicated OS thread and forwarded over a channel.
//! Reading stdin through Tokio would park a blocking read on the runtime's
//! blocking pool, and runtime shutdown waits for it; a detached thread lets
//! the process exit on Ctrl+C while a read is still pending.

use std::io::{self, BufRead};
use std::thread;

use tokio::sync::mpsc;
use tracing::debug;

/// Lines buffered between the reader thread and the trigger.
const LINE_BUFFER: usize = 16;

/// Spawns a thread that reads `input` line by line and sends each line (or
/// the read error that ended it) on the returned channel.
///
/// The channel closes at end of input, after a read error, or once the
/// receiver is dropped.
pub fn spawn_line_reader<R>(input: R) -> io::Result<mpsc::Receiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);

    thread::Builder::new()
        .name("console-reader".to_string())
        .spawn(move || {
            for line in input.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
            debug!("console reader finished");
        })?;

    Ok(rx)
}
