//! Network topology — the set of known peers.
//!
//! Status is never stored: it is derived from `last_seen` age against the
//! stale threshold *T* at the moment of the query (`online` < T, `stale`
//! < 2T, `offline` otherwise).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Default stale threshold *T* in milliseconds.
pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 3_000;

/// Role a node plays in the overlay, assigned dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Regular participant — sends and receives its own messages.
    Client,
    /// Forwards envelopes on behalf of others.
    Relay,
}

/// Derived liveness status of a known peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Online,
    Stale,
    Offline,
}

/// A known peer. Created on discovery, mutated by heartbeats and role
/// updates, destroyed only on explicit leave.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub node_id: NodeId,
    pub username: String,
    /// Relays this peer was last reachable through.
    pub reachable_via: Vec<NodeId>,
    /// Unix ms timestamp of last observed activity.
    pub last_seen: u64,
    pub roles: Vec<PeerRole>,
}

impl PeerInfo {
    pub fn new(node_id: NodeId, username: impl Into<String>, last_seen: u64) -> Self {
        Self {
            node_id,
            username: username.into(),
            reachable_via: Vec::new(),
            last_seen,
            roles: vec![PeerRole::Client],
        }
    }

    pub fn with_roles(mut self, roles: Vec<PeerRole>) -> Self {
        self.roles = roles;
        self
    }

    pub fn is_relay(&self) -> bool {
        self.roles.contains(&PeerRole::Relay)
    }
}

/// The peer map plus the threshold that turns ages into statuses.
#[derive(Debug)]
pub struct Topology {
    peers: HashMap<NodeId, PeerInfo>,
    stale_threshold_ms: u64,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_STALE_THRESHOLD_MS)
    }

    pub fn with_threshold(stale_threshold_ms: u64) -> Self {
        Self {
            peers: HashMap::new(),
            stale_threshold_ms,
        }
    }

    pub fn stale_threshold_ms(&self) -> u64 {
        self.stale_threshold_ms
    }

    /// Add a peer. Adding an already-known peer refreshes its `last_seen`
    /// (and roles, which the discovery layer may have updated).
    pub fn add_peer(&mut self, info: PeerInfo) {
        match self.peers.get_mut(&info.node_id) {
            Some(existing) => {
                existing.last_seen = existing.last_seen.max(info.last_seen);
                existing.roles = info.roles;
                existing.reachable_via = info.reachable_via;
            }
            None => {
                self.peers.insert(info.node_id, info);
            }
        }
    }

    /// Remove a peer. Removing an unknown peer is a no-op.
    pub fn remove_peer(&mut self, node_id: &NodeId) -> bool {
        self.peers.remove(node_id).is_some()
    }

    /// Refresh a peer's `last_seen`. Unknown peers are ignored.
    pub fn update_last_seen(&mut self, node_id: &NodeId, now: u64) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.last_seen = peer.last_seen.max(now);
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&PeerInfo> {
        self.peers.get(node_id)
    }

    /// Rewrite a peer's role set. Unknown peers are ignored.
    pub fn set_roles(&mut self, node_id: &NodeId, roles: Vec<PeerRole>) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.roles = roles;
        }
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Derived status of a peer at time `now`. Unknown peers are offline.
    pub fn status_of(&self, node_id: &NodeId, now: u64) -> PeerStatus {
        match self.peers.get(node_id) {
            Some(peer) => self.status_for_age(now.saturating_sub(peer.last_seen)),
            None => PeerStatus::Offline,
        }
    }

    fn status_for_age(&self, age_ms: u64) -> PeerStatus {
        if age_ms < self.stale_threshold_ms {
            PeerStatus::Online
        } else if age_ms < 2 * self.stale_threshold_ms {
            PeerStatus::Stale
        } else {
            PeerStatus::Offline
        }
    }

    /// Every peer whose derived status is not offline.
    pub fn reachable_peers(&self, now: u64) -> Vec<&PeerInfo> {
        self.peers
            .values()
            .filter(|p| self.status_of(&p.node_id, now) != PeerStatus::Offline)
            .collect()
    }

    /// Reachable peers holding the relay role.
    pub fn relays(&self, now: u64) -> Vec<&PeerInfo> {
        self.reachable_peers(now)
            .into_iter()
            .filter(|p| p.is_relay())
            .collect()
    }
}
