//! The hub: membership set plus fan-out of broadcast payloads.
//!
//! # Single owner, no locks
//!
//! [`HubLoop::run`] is the only code that ever reads or writes the
//! membership set.  Everybody else talks to it through a [`Hub`] handle,
//! which is just three bounded channel senders:
//!
//! | Intake       | Sent by                        | Effect                      |
//! |--------------|--------------------------------|-----------------------------|
//! | `register`   | transport adapter (per accept) | add a connection            |
//! | `unregister` | the connection itself on close | remove it (idempotent)      |
//! | `broadcast`  | console trigger                | `try_send` to every member  |
//!
//! The loop handles one event at a time.  Its `select!` is `biased` in the
//! order register → unregister → broadcast, so a registration that finished
//! sending before a broadcast was sent is always applied first.
//!
//! # Slow consumers
//!
//! Fan-out never waits on a peer.  A member whose outbound queue is full (or
//! whose writer is gone) is removed on the spot; dropping its handle closes
//! its queue, which in turn shuts the connection down.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::HubError;

/// Capacity of each of the hub's three intake channels.
const INTAKE_CAPACITY: usize = 64;

/// Cloneable handle to a running hub.
///
/// Constructed once with [`Hub::new`] (or [`Hub::spawn`]) and passed by
/// clone to every component that needs it.
#[derive(Debug, Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<ConnectionHandle>,
    unregister_tx: mpsc::Sender<ConnectionId>,
    broadcast_tx: mpsc::Sender<Bytes>,
    members: watch::Receiver<usize>,
}

/// The hub's coordination task.  Owns the membership set.
#[derive(Debug)]
pub struct HubLoop {
    register_rx: mpsc::Receiver<ConnectionHandle>,
    unregister_rx: mpsc::Receiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<Bytes>,
    members_tx: watch::Sender<usize>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl Hub {
    /// Creates a hub handle and the loop that must be run for it to do
    /// anything.
    pub fn new() -> (Self, HubLoop) {
        let (register_tx, register_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (members_tx, members) = watch::channel(0);

        let hub = Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            members,
        };
        let hub_loop = HubLoop {
            register_rx,
            unregister_rx,
            broadcast_rx,
            members_tx,
            connections: HashMap::new(),
        };
        (hub, hub_loop)
    }

    /// Creates a hub and spawns its loop on the current Tokio runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (hub, hub_loop) = Self::new();
        let task = tokio::spawn(hub_loop.run());
        (hub, task)
    }

    /// Admits a connection to the broadcast set.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        self.register_tx
            .send(handle)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Removes a connection from the broadcast set and closes its outbound
    /// queue.  Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.unregister_tx
            .send(id)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Submits `payload` for delivery to every connection that is a member
    /// when the hub gets to it.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.broadcast_tx
            .send(payload.into())
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Live view of the membership size.
    pub fn members(&self) -> watch::Receiver<usize> {
        self.members.clone()
    }

    /// Membership size as last published by the hub loop.
    pub fn connection_count(&self) -> usize {
        *self.members.borrow()
    }
}

impl HubLoop {
    /// Processes hub events until every [`Hub`] handle has been dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                Some(handle) = self.register_rx.recv() => self.admit(handle),
                Some(id) = self.unregister_rx.recv() => self.remove(id),
                Some(payload) = self.broadcast_rx.recv() => self.fan_out(&payload),
                else => break,
            }
        }

        debug!("hub loop stopped: all handles dropped");
    }

    fn admit(&mut self, handle: ConnectionHandle) {
        let id = handle.id();
        self.connections.insert(id, handle);
        self.publish();
        info!(
            "connection {id} registered ({} connected)",
            self.connections.len()
        );
    }

    fn remove(&mut self, id: ConnectionId) {
        // Dropping the handle closes the connection's outbound queue.
        if self.connections.remove(&id).is_some() {
            self.publish();
            info!(
                "connection {id} unregistered ({} connected)",
                self.connections.len()
            );
        }
    }

    fn fan_out(&mut self, payload: &Bytes) {
        let before = self.connections.len();

        self.connections.retain(|id, handle| {
            let accepted = handle.enqueue_send(payload.clone());
            if !accepted {
                warn!("dropping connection {id}: outbound queue full or closed");
            }
            accepted
        });

        if self.connections.len() != before {
            self.publish();
        }
        debug!(
            "broadcast {} byte(s) to {} connection(s)",
            payload.len(),
            self.connections.len()
        );
    }

    fn publish(&self) {
        self.members_tx.send_replace(self.connections.len());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
