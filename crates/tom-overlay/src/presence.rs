//! Peer liveness — heartbeat monitoring and debounced presence.
//!
//! `HeartbeatMonitor` is a pure state machine over heartbeat timestamps
//! with two-tier, edge-triggered transitions: a peer crossing the stale
//! threshold *T* fires `Stale` once, crossing 2*T* fires `Departed` once.
//! The send side is strategy-injected; the monitor itself never does I/O.
//!
//! `OfflineDetector` sits on top and debounces online↔offline: a
//! transition only fires after the new state has held for the full
//! debounce window, so short flaps are absorbed.

use std::collections::HashMap;

use crate::types::NodeId;

/// Default debounce window for online↔offline transitions.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1_000;

/// How heartbeats are emitted each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStrategy {
    /// One ping envelope per tracked peer.
    PerPeer,
    /// A single broadcast the transport fans out.
    Broadcast,
}

/// Outbound work produced by a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Ping { peer: NodeId },
    Broadcast,
}

/// Liveness tier of a tracked peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Alive,
    Stale,
    Departed,
}

/// Edge-triggered liveness transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    /// Crossed the stale threshold.
    PeerStale { node_id: NodeId },
    /// Crossed twice the stale threshold.
    PeerDeparted { node_id: NodeId },
    /// Heartbeats resumed after stale/departed.
    PeerBack { node_id: NodeId },
}

/// Tracks heartbeat recency for a set of peers.
pub struct HeartbeatMonitor {
    last_heartbeat: HashMap<NodeId, u64>,
    reported: HashMap<NodeId, LivenessState>,
    stale_threshold_ms: u64,
    strategy: PingStrategy,
}

impl HeartbeatMonitor {
    pub fn new(stale_threshold_ms: u64, strategy: PingStrategy) -> Self {
        Self {
            last_heartbeat: HashMap::new(),
            reported: HashMap::new(),
            stale_threshold_ms,
            strategy,
        }
    }

    /// Start tracking a peer, treating `now` as its first heartbeat.
    pub fn track_peer(&mut self, node_id: NodeId, now: u64) {
        self.last_heartbeat.entry(node_id).or_insert(now);
        self.reported.entry(node_id).or_insert(LivenessState::Alive);
    }

    pub fn untrack_peer(&mut self, node_id: &NodeId) {
        self.last_heartbeat.remove(node_id);
        self.reported.remove(node_id);
    }

    pub fn tracked_count(&self) -> usize {
        self.last_heartbeat.len()
    }

    /// Record an inbound heartbeat.
    pub fn record_heartbeat(&mut self, node_id: NodeId, now: u64) {
        let entry = self.last_heartbeat.entry(node_id).or_insert(now);
        *entry = (*entry).max(now);
        self.reported.entry(node_id).or_insert(LivenessState::Alive);
    }

    /// Liveness tier of a peer at `now`. Untracked peers are departed.
    pub fn liveness_at(&self, node_id: &NodeId, now: u64) -> LivenessState {
        let Some(&last) = self.last_heartbeat.get(node_id) else {
            return LivenessState::Departed;
        };
        let elapsed = now.saturating_sub(last);
        if elapsed >= 2 * self.stale_threshold_ms {
            LivenessState::Departed
        } else if elapsed >= self.stale_threshold_ms {
            LivenessState::Stale
        } else {
            LivenessState::Alive
        }
    }

    /// The pings to emit this tick, per the injected strategy.
    pub fn tick_send(&self) -> Vec<HeartbeatAction> {
        match self.strategy {
            PingStrategy::Broadcast => vec![HeartbeatAction::Broadcast],
            PingStrategy::PerPeer => self
                .last_heartbeat
                .keys()
                .map(|&peer| HeartbeatAction::Ping { peer })
                .collect(),
        }
    }

    /// Check every tracked peer, emitting one event per tier crossing.
    pub fn check(&mut self, now: u64) -> Vec<LivenessEvent> {
        let mut events = Vec::new();
        let ids: Vec<NodeId> = self.last_heartbeat.keys().copied().collect();
        for node_id in ids {
            let current = self.liveness_at(&node_id, now);
            let previous = self
                .reported
                .insert(node_id, current)
                .unwrap_or(LivenessState::Alive);
            if current == previous {
                continue;
            }
            match current {
                LivenessState::Stale => events.push(LivenessEvent::PeerStale { node_id }),
                LivenessState::Departed => events.push(LivenessEvent::PeerDeparted { node_id }),
                LivenessState::Alive => events.push(LivenessEvent::PeerBack { node_id }),
            }
        }
        events
    }
}

// ── Debounced presence ─────────────────────────────────────────────────

/// A committed online/offline transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceTransition {
    pub node_id: NodeId,
    pub online: bool,
}

struct PresenceState {
    /// The state observers currently believe.
    reported: bool,
    /// A candidate state waiting out the debounce window.
    pending: Option<(bool, u64)>,
}

/// Debounces raw online/offline observations.
pub struct OfflineDetector {
    debounce_ms: u64,
    peers: HashMap<NodeId, PresenceState>,
}

impl OfflineDetector {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            peers: HashMap::new(),
        }
    }

    /// Feed a raw observation. The first observation of a peer sets its
    /// initial state without firing a transition.
    pub fn observe(&mut self, node_id: NodeId, online: bool, now: u64) {
        match self.peers.get_mut(&node_id) {
            None => {
                self.peers.insert(
                    node_id,
                    PresenceState {
                        reported: online,
                        pending: None,
                    },
                );
            }
            Some(state) => {
                if online == state.reported {
                    // Back to the reported state within the window — the
                    // flap is absorbed.
                    state.pending = None;
                } else {
                    match state.pending {
                        Some((target, _)) if target == online => {} // already counting down
                        _ => state.pending = Some((online, now)),
                    }
                }
            }
        }
    }

    /// Commit every pending transition whose window has fully elapsed.
    pub fn poll(&mut self, now: u64) -> Vec<PresenceTransition> {
        let mut transitions = Vec::new();
        for (&node_id, state) in self.peers.iter_mut() {
            if let Some((target, since)) = state.pending {
                if now.saturating_sub(since) >= self.debounce_ms {
                    state.reported = target;
                    state.pending = None;
                    transitions.push(PresenceTransition {
                        node_id,
                        online: target,
                    });
                }
            }
        }
        transitions
    }

    /// The currently reported state, if the peer has been observed.
    pub fn reported(&self, node_id: &NodeId) -> Option<bool> {
        self.peers.get(node_id).map(|s| s.reported)
    }

    pub fn forget(&mut self, node_id: &NodeId) {
        self.peers.remove(node_id);
    }

    /// Drop all state and pending transitions. Idempotent.
    pub fn reset(&mut self) {
        self.peers.clear();
    }
}
