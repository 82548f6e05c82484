//! In-memory transports for exercising connections without sockets.
//!
//! [`MockSink`] records every frame it is asked to write and can be told
//! to fail or hang.  [`MockSource`] yields whatever its [`SourceControl`]
//! pushes; dropping the control looks like the peer hanging up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::error::ConnectionIoError;
use crate::transport::{FrameSink, FrameSource, InboundFrame};

/// How a [`MockSink`] responds to writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkBehavior {
    /// Record the frame and succeed.
    Accept,
    /// Fail every write with [`ConnectionIoError::Write`].
    Fail,
    /// Never complete a write or a close, like a peer that stopped reading.
    Stall,
}

/// A [`FrameSink`] that records frames in memory.
pub struct MockSink {
    behavior: SinkBehavior,
    frames: watch::Sender<Vec<Bytes>>,
    pings: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

/// Read-only view of what a [`MockSink`] has seen.  Stays usable after the
/// sink itself has been moved into a connection and dropped.
#[derive(Clone)]
pub struct SinkRecorder {
    frames: watch::Receiver<Vec<Bytes>>,
    pings: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockSink {
    /// A sink that accepts every frame.
    pub fn new() -> (Self, SinkRecorder) {
        Self::with_behavior(SinkBehavior::Accept)
    }

    /// A sink with the given write behaviour.
    pub fn with_behavior(behavior: SinkBehavior) -> (Self, SinkRecorder) {
        let (frames_tx, frames_rx) = watch::channel(Vec::new());
        let pings = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let recorder = SinkRecorder {
            frames: frames_rx,
            pings: Arc::clone(&pings),
            closes: Arc::clone(&closes),
        };
        let sink = Self {
            behavior,
            frames: frames_tx,
            pings,
            closes,
        };
        (sink, recorder)
    }

    async fn gate(&self) -> Result<(), ConnectionIoError> {
        match self.behavior {
            SinkBehavior::Accept => Ok(()),
            SinkBehavior::Fail => Err(ConnectionIoError::Write("mock write failure".to_string())),
            SinkBehavior::Stall => std::future::pending().await,
        }
    }
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_frame(&mut self, payload: Bytes) -> Result<(), ConnectionIoError> {
        self.gate().await?;
        self.frames.send_modify(|frames| frames.push(payload));
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), ConnectionIoError> {
        self.gate().await?;
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.behavior == SinkBehavior::Stall {
            std::future::pending::<()>().await;
        }
    }
}

impl SinkRecorder {
    /// Every payload written so far, in write order.
    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.borrow().clone()
    }

    /// Waits until at least `count` payloads have been written (or the sink
    /// is gone) and returns them.
    pub async fn wait_for_frames(&mut self, count: usize) -> Vec<Bytes> {
        let _ = self.frames.wait_for(|frames| frames.len() >= count).await;
        self.frames()
    }

    /// Number of keepalive pings written.
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Number of times `close` was called.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// A [`FrameSource`] fed by a [`SourceControl`].
pub struct MockSource {
    inbound: mpsc::UnboundedReceiver<Result<InboundFrame, ConnectionIoError>>,
}

/// Drives a [`MockSource`].  Drop it to simulate the peer closing.
pub struct SourceControl {
    inbound: mpsc::UnboundedSender<Result<InboundFrame, ConnectionIoError>>,
}

impl MockSource {
    /// Creates a source and its control.
    pub fn new() -> (Self, SourceControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { inbound: rx }, SourceControl { inbound: tx })
    }
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionIoError>> {
        self.inbound.recv().await
    }
}

impl SourceControl {
    /// Delivers an inbound frame to the reader.
    pub fn push(&self, frame: InboundFrame) {
        let _ = self.inbound.send(Ok(frame));
    }

    /// Makes the reader's next read fail.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .inbound
            .send(Err(ConnectionIoError::Read(reason.to_string())));
    }
}
