//! In-process transport — peer channels over tokio mpsc.
//!
//! `MemoryNetwork` is the shared registry; each participant calls
//! `attach()` to obtain a `MemoryNode`. Nodes exchange raw frames with
//! pairwise FIFO ordering (a property the overlay relies on), and observe
//! connection lifecycle through a broadcast of `ConnEvent`s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};

use crate::{NodeId, TomTransportError};

const INBOX_CAPACITY: usize = 256;
const CONN_EVENT_CAPACITY: usize = 64;

/// Connection lifecycle event observed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// A peer channel was opened (we connected, or a send established it).
    Opened { peer: NodeId },
    /// A peer channel closed (disconnect, shutdown, or send failure).
    Closed { peer: NodeId },
}

struct Registration {
    inbox: mpsc::Sender<(NodeId, Vec<u8>)>,
    conn_tx: broadcast::Sender<ConnEvent>,
}

/// Shared registry wiring `MemoryNode`s together.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    nodes: Arc<Mutex<HashMap<NodeId, Registration>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its handle. Re-attaching the same id
    /// replaces the previous registration.
    pub fn attach(&self, id: NodeId) -> MemoryNode {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (conn_tx, _) = broadcast::channel(CONN_EVENT_CAPACITY);
        self.nodes.lock().unwrap().insert(
            id,
            Registration {
                inbox: inbox_tx,
                conn_tx: conn_tx.clone(),
            },
        );
        MemoryNode {
            id,
            nodes: Arc::clone(&self.nodes),
            inbox: inbox_rx,
            links: Mutex::new(HashMap::new()),
            conn_tx,
        }
    }
}

/// A live channel to one peer. Cheap to clone; clones share the channel.
#[derive(Clone)]
pub struct MemoryLink {
    local: NodeId,
    peer: NodeId,
    tx: mpsc::Sender<(NodeId, Vec<u8>)>,
}

impl MemoryLink {
    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Send a frame to the peer. Fails once the peer has shut down.
    pub async fn send(&self, data: &[u8]) -> Result<(), TomTransportError> {
        self.tx
            .send((self.local, data.to_vec()))
            .await
            .map_err(|_| TomTransportError::ConnectionClosed(self.peer.to_string()))
    }
}

/// A participant in a `MemoryNetwork`.
pub struct MemoryNode {
    id: NodeId,
    nodes: Arc<Mutex<HashMap<NodeId, Registration>>>,
    inbox: mpsc::Receiver<(NodeId, Vec<u8>)>,
    links: Mutex<HashMap<NodeId, MemoryLink>>,
    conn_tx: broadcast::Sender<ConnEvent>,
}

impl MemoryNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Subscribe to connection lifecycle events for this node.
    pub fn conn_events(&self) -> broadcast::Receiver<ConnEvent> {
        self.conn_tx.subscribe()
    }

    /// Open (or reuse) a channel to `peer`.
    ///
    /// Idempotent: a second call returns the same live channel. A link
    /// whose peer has since shut down is replaced transparently.
    pub fn connect(&self, peer: NodeId) -> Result<MemoryLink, TomTransportError> {
        let mut links = self.links.lock().unwrap();
        if let Some(link) = links.get(&peer) {
            if link.is_open() {
                return Ok(link.clone());
            }
            links.remove(&peer);
        }

        let tx = {
            let nodes = self.nodes.lock().unwrap();
            let reg = nodes
                .get(&peer)
                .ok_or_else(|| TomTransportError::PeerUnreachable(peer.to_string()))?;
            reg.inbox.clone()
        };
        let link = MemoryLink {
            local: self.id,
            peer,
            tx,
        };
        links.insert(peer, link.clone());
        let _ = self.conn_tx.send(ConnEvent::Opened { peer });
        Ok(link)
    }

    /// The live channel to `peer`, if one is open.
    pub fn link(&self, peer: NodeId) -> Option<MemoryLink> {
        let links = self.links.lock().unwrap();
        links.get(&peer).filter(|l| l.is_open()).cloned()
    }

    /// Peers we currently hold an open channel to.
    pub fn connected_peers(&self) -> Vec<NodeId> {
        let links = self.links.lock().unwrap();
        links
            .values()
            .filter(|l| l.is_open())
            .map(|l| l.peer())
            .collect()
    }

    /// Send raw frame bytes to `peer`, opening a channel on demand.
    pub async fn send_raw(&self, peer: NodeId, data: &[u8]) -> Result<(), TomTransportError> {
        let link = match self.link(peer) {
            Some(link) => link,
            None => {
                let tx = {
                    let nodes = self.nodes.lock().unwrap();
                    let reg = nodes
                        .get(&peer)
                        .ok_or_else(|| TomTransportError::PeerUnreachable(peer.to_string()))?;
                    reg.inbox.clone()
                };
                MemoryLink {
                    local: self.id,
                    peer,
                    tx,
                }
            }
        };

        match link.send(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // The peer went away under us — drop the dead link and
                // surface the closure.
                if self.links.lock().unwrap().remove(&peer).is_some() {
                    let _ = self.conn_tx.send(ConnEvent::Closed { peer });
                }
                Err(e)
            }
        }
    }

    /// Close the channel to `peer`. No-op if none is open.
    pub fn disconnect(&self, peer: NodeId) {
        let removed = self.links.lock().unwrap().remove(&peer).is_some();
        if removed {
            let _ = self.conn_tx.send(ConnEvent::Closed { peer });
            let nodes = self.nodes.lock().unwrap();
            if let Some(reg) = nodes.get(&peer) {
                let _ = reg.conn_tx.send(ConnEvent::Closed { peer: self.id });
            }
        }
    }

    /// Receive the next inbound frame.
    ///
    /// Returns `Shutdown` once this node has been shut down and the inbox
    /// is drained.
    pub async fn recv_raw(&mut self) -> Result<(NodeId, Vec<u8>), TomTransportError> {
        self.inbox.recv().await.ok_or(TomTransportError::Shutdown)
    }

    /// Leave the network: deregister, close every open channel, stop
    /// accepting inbound frames. Idempotent.
    ///
    /// Every remaining node hears `Closed{us}` — peers that connected to
    /// us hold the only record of that channel, so the closure has to be
    /// announced, not tracked.
    pub fn shutdown(&mut self) {
        self.inbox.close();

        let peers: Vec<NodeId> = {
            let mut links = self.links.lock().unwrap();
            links.drain().map(|(peer, _)| peer).collect()
        };
        for peer in peers {
            let _ = self.conn_tx.send(ConnEvent::Closed { peer });
        }

        let mut nodes = self.nodes.lock().unwrap();
        if nodes.remove(&self.id).is_none() {
            return; // already shut down
        }
        for reg in nodes.values() {
            let _ = reg.conn_tx.send(ConnEvent::Closed { peer: self.id });
        }
        tracing::debug!(node = %self.id, "transport shut down");
    }
}
