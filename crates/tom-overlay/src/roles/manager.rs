/// Role manager — scores peers and assigns `client`/`relay` under a
/// network-wide quota.
///
/// score = 0.4·normalizedUptime + 0.3·normalizedBandwidth
///       + 0.3·(contribution/100)
///
/// with quota = ceil(N / R) relays over the N non-offline peers. The
/// runtime re-evaluates on topology change, on a periodic tick, and on
/// operator request. Remote `role-assign` announcements are applied to
/// peer assignments but never overwrite the local node's computed role.
use std::collections::HashMap;

use crate::roles::metrics::{NodeMetrics, CONTRIBUTION_CAP};
use crate::topology::{PeerRole, Topology};
use crate::types::NodeId;

/// Default target ratio R — roughly this many clients per relay.
pub const DEFAULT_CLIENTS_PER_RELAY: u32 = 4;

const UPTIME_WEIGHT: f64 = 0.4;
const BANDWIDTH_WEIGHT: f64 = 0.3;
const CONTRIBUTION_WEIGHT: f64 = 0.3;

/// Why an assignment holds its current roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignReason {
    /// Scored into the relay quota.
    QuotaRelay,
    /// Below the relay cut line.
    Client,
    /// Applied verbatim from a remote announcement.
    Remote,
}

/// One assignment per known peer, rewritten atomically on evaluation.
#[derive(Debug, Clone)]
pub struct RoleAssignment {
    pub node_id: NodeId,
    pub roles: Vec<PeerRole>,
    pub assigned_at: u64,
    pub score: f64,
    pub reason: AssignReason,
}

/// A real role transition, reported to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleChange {
    pub node_id: NodeId,
    pub old_roles: Vec<PeerRole>,
    pub new_roles: Vec<PeerRole>,
    pub score: f64,
}

/// Relay quota for a cohort of `n` non-offline peers.
pub fn relay_quota(n: usize, clients_per_relay: u32) -> usize {
    if n == 0 {
        return 0;
    }
    let r = clients_per_relay.max(1) as usize;
    n.div_ceil(r)
}

pub struct RoleManager {
    local_id: NodeId,
    clients_per_relay: u32,
    metrics: HashMap<NodeId, NodeMetrics>,
    assignments: HashMap<NodeId, RoleAssignment>,
}

impl RoleManager {
    pub fn new(local_id: NodeId) -> Self {
        Self::with_ratio(local_id, DEFAULT_CLIENTS_PER_RELAY)
    }

    pub fn with_ratio(local_id: NodeId, clients_per_relay: u32) -> Self {
        Self {
            local_id,
            clients_per_relay,
            metrics: HashMap::new(),
            assignments: HashMap::new(),
        }
    }

    // ── Metrics feeds ──────────────────────────────────────────────────

    fn metrics_mut(&mut self, node_id: NodeId, now: u64) -> &mut NodeMetrics {
        self.metrics
            .entry(node_id)
            .or_insert_with(|| NodeMetrics::new(now))
    }

    /// A peer forwarded a message (relay ACK observed, or we forwarded).
    pub fn record_relay(&mut self, node_id: NodeId, now: u64) {
        self.metrics_mut(node_id, now).record_relay(now);
    }

    pub fn record_relay_failure(&mut self, node_id: NodeId, now: u64) {
        self.metrics_mut(node_id, now).record_relay_failure(now);
    }

    /// Bytes the router counted through this peer.
    pub fn record_bytes_relayed(&mut self, node_id: NodeId, bytes: u64, now: u64) {
        self.metrics_mut(node_id, now).record_bytes_relayed(bytes, now);
    }

    /// Fold a periodic topology snapshot into every tracked peer.
    pub fn observe_snapshot(&mut self, topology: &Topology, now: u64) {
        let peer_count = topology.len();
        for peer in topology.peers() {
            self.metrics_mut(peer.node_id, now)
                .observe_snapshot(peer_count, now);
        }
    }

    pub fn remove_node(&mut self, node_id: &NodeId) {
        self.metrics.remove(node_id);
        self.assignments.remove(node_id);
    }

    pub fn metrics(&self, node_id: &NodeId) -> Option<&NodeMetrics> {
        self.metrics.get(node_id)
    }

    pub fn assignment(&self, node_id: &NodeId) -> Option<&RoleAssignment> {
        self.assignments.get(node_id)
    }

    /// The local node's current roles (client until assigned otherwise).
    pub fn local_roles(&self) -> Vec<PeerRole> {
        self.assignments
            .get(&self.local_id)
            .map(|a| a.roles.clone())
            .unwrap_or_else(|| vec![PeerRole::Client])
    }

    // ── Scoring ────────────────────────────────────────────────────────

    fn cohort_maxima(&self) -> (f64, f64) {
        let max_uptime = self
            .metrics
            .values()
            .map(|m| m.uptime_secs as f64)
            .fold(0.0, f64::max);
        let max_bandwidth = self
            .metrics
            .values()
            .map(|m| m.bandwidth_score)
            .fold(0.0, f64::max);
        (max_uptime, max_bandwidth)
    }

    fn score_with_maxima(&self, node_id: &NodeId, max_uptime: f64, max_bandwidth: f64) -> f64 {
        let Some(m) = self.metrics.get(node_id) else {
            return 0.0;
        };
        let norm_uptime = if max_uptime > 0.0 {
            m.uptime_secs as f64 / max_uptime
        } else {
            0.0
        };
        let norm_bandwidth = if max_bandwidth > 0.0 {
            m.bandwidth_score / max_bandwidth
        } else {
            0.0
        };
        UPTIME_WEIGHT * norm_uptime
            + BANDWIDTH_WEIGHT * norm_bandwidth
            + CONTRIBUTION_WEIGHT * (m.contribution_score / CONTRIBUTION_CAP)
    }

    /// The peer's current composite score in [0, 1].
    pub fn score(&self, node_id: &NodeId) -> f64 {
        let (max_uptime, max_bandwidth) = self.cohort_maxima();
        self.score_with_maxima(node_id, max_uptime, max_bandwidth)
    }

    // ── Assignment ─────────────────────────────────────────────────────

    /// Re-score the non-offline cohort and rewrite every assignment.
    ///
    /// Returns one `RoleChange` per peer whose role set actually changed;
    /// the caller surfaces those and broadcasts its own.
    pub fn evaluate(&mut self, topology: &mut Topology, now: u64) -> Vec<RoleChange> {
        let (max_uptime, max_bandwidth) = self.cohort_maxima();

        let mut cohort: Vec<(NodeId, f64)> = topology
            .reachable_peers(now)
            .into_iter()
            .map(|p| {
                let score = self.score_with_maxima(&p.node_id, max_uptime, max_bandwidth);
                (p.node_id, score)
            })
            .collect();

        // Score descending, NodeId ascending as the deterministic tiebreak.
        cohort.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let quota = relay_quota(cohort.len(), self.clients_per_relay);
        let mut changes = Vec::new();

        for (rank, (node_id, score)) in cohort.iter().enumerate() {
            let (new_roles, reason) = if rank < quota {
                (vec![PeerRole::Relay], AssignReason::QuotaRelay)
            } else {
                (vec![PeerRole::Client], AssignReason::Client)
            };

            let old_roles = self
                .assignments
                .get(node_id)
                .map(|a| a.roles.clone())
                .or_else(|| topology.get(node_id).map(|p| p.roles.clone()))
                .unwrap_or_else(|| vec![PeerRole::Client]);

            if old_roles != new_roles {
                changes.push(RoleChange {
                    node_id: *node_id,
                    old_roles,
                    new_roles: new_roles.clone(),
                    score: *score,
                });
            }

            topology.set_roles(node_id, new_roles.clone());
            self.assignments.insert(
                *node_id,
                RoleAssignment {
                    node_id: *node_id,
                    roles: new_roles,
                    assigned_at: now,
                    score: *score,
                    reason,
                },
            );
        }

        changes
    }

    /// Apply a remote `role-assign` announcement.
    ///
    /// Announcements about the local node are ignored — only the local
    /// evaluation may set our own role.
    pub fn apply_remote(
        &mut self,
        node_id: NodeId,
        roles: Vec<PeerRole>,
        topology: &mut Topology,
        now: u64,
    ) -> Option<RoleChange> {
        if node_id == self.local_id {
            return None;
        }

        let old_roles = self
            .assignments
            .get(&node_id)
            .map(|a| a.roles.clone())
            .or_else(|| topology.get(&node_id).map(|p| p.roles.clone()))
            .unwrap_or_else(|| vec![PeerRole::Client]);

        topology.set_roles(&node_id, roles.clone());
        let score = self.score(&node_id);
        self.assignments.insert(
            node_id,
            RoleAssignment {
                node_id,
                roles: roles.clone(),
                assigned_at: now,
                score,
                reason: AssignReason::Remote,
            },
        );

        (old_roles != roles).then_some(RoleChange {
            node_id,
            old_roles,
            new_roles: roles,
            score,
        })
    }

    /// Nominate a backup hub: the best-scoring relay other than the
    /// current hub, NodeId-ascending tiebreak.
    pub fn backup_hub_nominee(
        &self,
        hub: &NodeId,
        topology: &Topology,
        now: u64,
    ) -> Option<NodeId> {
        let (max_uptime, max_bandwidth) = self.cohort_maxima();
        let mut candidates: Vec<(NodeId, f64)> = topology
            .relays(now)
            .into_iter()
            .filter(|p| p.node_id != *hub)
            .map(|p| {
                let score = self.score_with_maxima(&p.node_id, max_uptime, max_bandwidth);
                (p.node_id, score)
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.first().map(|(id, _)| *id)
    }
}
