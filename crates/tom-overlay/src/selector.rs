/// Relay selection — picks the best relay among known peers.
///
/// Pure logic: reads the topology and role scores, returns a selection
/// with the reason. Candidates are non-offline relay-role peers, never
/// self or the target. The composite blends the role score with
/// last-seen freshness; ties break on NodeId ascending.
use std::collections::HashSet;

use crate::roles::RoleManager;
use crate::topology::Topology;
use crate::types::NodeId;

const ROLE_SCORE_WEIGHT: f64 = 0.7;
const FRESHNESS_WEIGHT: f64 = 0.3;

/// Why a selection turned out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// The target is the local node itself — nothing to relay.
    RecipientIsSelf,
    /// The topology is empty.
    NoPeers,
    /// No eligible relay exists (or all of them failed).
    NoRelaysAvailable,
    /// Best composite score among several candidates.
    BestScore,
    /// Exactly one eligible relay.
    OnlyOption,
    /// Picked after excluding failed relays.
    Alternate,
}

impl SelectionReason {
    /// Stable string form surfaced in operator events.
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionReason::RecipientIsSelf => "recipient-is-self",
            SelectionReason::NoPeers => "no-peers",
            SelectionReason::NoRelaysAvailable => "no-relays-available",
            SelectionReason::BestScore => "best-score",
            SelectionReason::OnlyOption => "only-option",
            SelectionReason::Alternate => "alternate",
        }
    }
}

/// Result of relay selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySelection {
    pub relay_id: Option<NodeId>,
    pub reason: SelectionReason,
}

pub struct RelaySelector {
    local_id: NodeId,
}

impl RelaySelector {
    pub fn new(local_id: NodeId) -> Self {
        Self { local_id }
    }

    /// Select the best relay to reach `target`.
    pub fn select_best(
        &self,
        target: NodeId,
        topology: &Topology,
        roles: &RoleManager,
        now: u64,
    ) -> RelaySelection {
        self.select(target, topology, roles, now, None)
    }

    /// Select a relay skipping everything in `failed`. Returns no relay
    /// once every candidate has failed.
    pub fn select_alternate(
        &self,
        target: NodeId,
        topology: &Topology,
        roles: &RoleManager,
        failed: &HashSet<NodeId>,
        now: u64,
    ) -> RelaySelection {
        self.select(target, topology, roles, now, Some(failed))
    }

    fn select(
        &self,
        target: NodeId,
        topology: &Topology,
        roles: &RoleManager,
        now: u64,
        failed: Option<&HashSet<NodeId>>,
    ) -> RelaySelection {
        if target == self.local_id {
            return RelaySelection {
                relay_id: None,
                reason: SelectionReason::RecipientIsSelf,
            };
        }
        if topology.is_empty() {
            return RelaySelection {
                relay_id: None,
                reason: SelectionReason::NoPeers,
            };
        }

        let horizon = 2 * topology.stale_threshold_ms();
        let mut candidates: Vec<(NodeId, f64)> = topology
            .relays(now)
            .into_iter()
            .filter(|p| {
                p.node_id != self.local_id
                    && p.node_id != target
                    && failed.map_or(true, |f| !f.contains(&p.node_id))
            })
            .map(|p| {
                let age = now.saturating_sub(p.last_seen) as f64;
                let freshness = 1.0 - (age / horizon as f64).min(1.0);
                let composite =
                    ROLE_SCORE_WEIGHT * roles.score(&p.node_id) + FRESHNESS_WEIGHT * freshness;
                (p.node_id, composite)
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let reason = match (candidates.len(), failed) {
            (0, _) => {
                return RelaySelection {
                    relay_id: None,
                    reason: SelectionReason::NoRelaysAvailable,
                }
            }
            (_, Some(f)) if !f.is_empty() => SelectionReason::Alternate,
            (1, _) => SelectionReason::OnlyOption,
            _ => SelectionReason::BestScore,
        };

        RelaySelection {
            relay_id: Some(candidates[0].0),
            reason,
        }
    }
}
