/// Direct-path manager — opportunistic relay → direct upgrades.
///
/// Pure state machine over per-peer conversations. The runtime executes
/// the actual connects; this module decides when to attempt, dedupes
/// in-flight attempts, applies reconnect backoff (1 s, 2 s, 4 s capped,
/// 30 s cooldown after three failures) and reports path transitions.
/// Fallback to relay is automatic: the router consults
/// `connection_type()` on every send.
use std::collections::{HashMap, HashSet};

use crate::types::NodeId;

/// Base reconnect delay.
pub const RETRY_BASE_MS: u64 = 1_000;

/// Reconnect delay cap.
pub const RETRY_CAP_MS: u64 = 4_000;

/// Failures before the cooldown gate closes.
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Cooldown after exhausting the attempts.
pub const RETRY_COOLDOWN_MS: u64 = 30_000;

/// Stagger between reconnects when several peers come online at once.
pub const MULTI_PEER_STAGGER_MS: u64 = 100;

/// Per-peer conversation state.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub started_at: u64,
    pub last_message_at: u64,
    pub direct_path_active: bool,
    pub had_direct_path: bool,
    pub reconnect_attempts: u32,
    cooldown_until: Option<u64>,
}

/// How envelopes to a peer currently travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Direct,
    Relay,
}

/// Outcome of an upgrade attempt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Go ahead — call `transport.connect` and report the result.
    Connect,
    /// A direct path is already active.
    AlreadyActive,
    /// No conversation with this peer exists.
    NoConversation,
    /// An attempt is already in flight.
    InFlight,
    /// The cooldown gate is closed.
    CoolingDown,
}

/// Path transition observed by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectPathEvent {
    Established { peer: NodeId },
    Restored { peer: NodeId },
    Lost { peer: NodeId },
}

/// Reconnect delay for the given (zero-based) attempt count.
pub fn retry_delay_ms(attempts: u32) -> u64 {
    (RETRY_BASE_MS << attempts.min(31)).min(RETRY_CAP_MS)
}

pub struct DirectPathManager {
    local_id: NodeId,
    conversations: HashMap<NodeId, ConversationState>,
    pending: HashSet<NodeId>,
}

impl DirectPathManager {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            conversations: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    /// Note an envelope exchanged with `other` (sent or received).
    pub fn note_message(&mut self, other: NodeId, now: u64) {
        if other == self.local_id {
            return;
        }
        self.conversations
            .entry(other)
            .and_modify(|c| c.last_message_at = c.last_message_at.max(now))
            .or_insert(ConversationState {
                started_at: now,
                last_message_at: now,
                direct_path_active: false,
                had_direct_path: false,
                reconnect_attempts: 0,
                cooldown_until: None,
            });
    }

    pub fn conversation(&self, peer: &NodeId) -> Option<&ConversationState> {
        self.conversations.get(peer)
    }

    pub fn connection_type(&self, peer: &NodeId) -> ConnectionType {
        match self.conversations.get(peer) {
            Some(c) if c.direct_path_active => ConnectionType::Direct,
            _ => ConnectionType::Relay,
        }
    }

    /// Request a direct-path upgrade attempt for `peer`.
    pub fn attempt(&mut self, peer: NodeId, now: u64) -> AttemptOutcome {
        let Some(conv) = self.conversations.get_mut(&peer) else {
            return AttemptOutcome::NoConversation;
        };
        if conv.direct_path_active {
            return AttemptOutcome::AlreadyActive;
        }
        if self.pending.contains(&peer) {
            return AttemptOutcome::InFlight;
        }
        match conv.cooldown_until {
            Some(until) if now < until => return AttemptOutcome::CoolingDown,
            Some(_) => {
                // Cooldown expired — attempts reset.
                conv.cooldown_until = None;
                conv.reconnect_attempts = 0;
            }
            None => {}
        }
        self.pending.insert(peer);
        AttemptOutcome::Connect
    }

    /// The transport connect succeeded.
    pub fn connect_succeeded(&mut self, peer: NodeId) -> Option<DirectPathEvent> {
        self.pending.remove(&peer);
        let conv = self.conversations.get_mut(&peer)?;
        let restored = conv.had_direct_path;
        conv.direct_path_active = true;
        conv.had_direct_path = true;
        conv.reconnect_attempts = 0;
        conv.cooldown_until = None;
        Some(if restored {
            DirectPathEvent::Restored { peer }
        } else {
            DirectPathEvent::Established { peer }
        })
    }

    /// The transport connect failed.
    pub fn connect_failed(&mut self, peer: NodeId, now: u64) {
        self.pending.remove(&peer);
        if let Some(conv) = self.conversations.get_mut(&peer) {
            conv.reconnect_attempts += 1;
            if conv.reconnect_attempts >= RETRY_MAX_ATTEMPTS {
                conv.cooldown_until = Some(now + RETRY_COOLDOWN_MS);
            }
        }
    }

    /// The direct connection to `peer` dropped.
    pub fn path_lost(&mut self, peer: NodeId) -> Option<DirectPathEvent> {
        let conv = self.conversations.get_mut(&peer)?;
        if !conv.direct_path_active {
            return None;
        }
        conv.direct_path_active = false;
        Some(DirectPathEvent::Lost { peer })
    }

    /// A peer we previously had a direct path with came back online.
    /// Returns the backoff delay before the reconnect attempt, or `None`
    /// when no attempt should be scheduled.
    pub fn on_peer_online(&mut self, peer: NodeId, now: u64) -> Option<u64> {
        let conv = self.conversations.get_mut(&peer)?;
        if !conv.had_direct_path || conv.direct_path_active || self.pending.contains(&peer) {
            return None;
        }
        match conv.cooldown_until {
            Some(until) if now < until => return None,
            Some(_) => {
                conv.cooldown_until = None;
                conv.reconnect_attempts = 0;
            }
            None => {}
        }
        Some(retry_delay_ms(conv.reconnect_attempts))
    }

    /// Several peers came online at once — stagger the reconnects to
    /// avoid a signaling burst.
    pub fn on_peers_online(&mut self, peers: &[NodeId], now: u64) -> Vec<(NodeId, u64)> {
        let mut plans = Vec::new();
        for &peer in peers {
            if let Some(delay) = self.on_peer_online(peer, now) {
                plans.push((peer, delay + plans.len() as u64 * MULTI_PEER_STAGGER_MS));
            }
        }
        plans
    }

    /// Drop all conversation state and in-flight attempts. Idempotent.
    pub fn reset(&mut self) {
        self.conversations.clear();
        self.pending.clear();
    }

    pub fn forget(&mut self, peer: &NodeId) {
        self.conversations.remove(peer);
        self.pending.remove(peer);
    }
}
