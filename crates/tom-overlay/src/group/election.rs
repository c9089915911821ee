/// Deterministic hub election for group failover.
///
/// When a hub becomes unavailable, every member independently runs the
/// same algorithm over the same candidate set and arrives at the same
/// winner — determinism replaces consensus and prevents split-brain.
use crate::group::types::GroupState;
use crate::topology::{PeerStatus, Topology};
use crate::types::NodeId;

/// Result of a hub election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionResult {
    /// The elected hub (`None` if no candidates were available).
    pub new_hub_id: Option<NodeId>,
    pub reason: ElectionReason,
    pub candidate_count: usize,
}

/// Why a hub was (or wasn't) elected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionReason {
    /// The pre-selected backup hub was available.
    Backup,
    /// Lexicographically smallest NodeId among candidates.
    Deterministic,
    /// No eligible candidates — the group degrades.
    NoCandidates,
}

/// Elect a new hub for `group` after `failed_hub` became unavailable.
///
/// Candidates are non-offline relay-role peers other than the failed
/// hub. The backup hub wins if it is among them; otherwise the smallest
/// NodeId does.
pub fn elect_hub(group: &GroupState, failed_hub: &NodeId, topology: &Topology, now: u64) -> ElectionResult {
    let mut candidates: Vec<NodeId> = topology
        .relays(now)
        .into_iter()
        .filter(|peer| peer.node_id != *failed_hub)
        .map(|peer| peer.node_id)
        .collect();
    let candidate_count = candidates.len();

    if let Some(backup) = &group.backup_hub_id {
        if *backup != *failed_hub
            && candidates.contains(backup)
            && topology.status_of(backup, now) != PeerStatus::Offline
        {
            return ElectionResult {
                new_hub_id: Some(*backup),
                reason: ElectionReason::Backup,
                candidate_count,
            };
        }
    }

    if candidates.is_empty() {
        return ElectionResult {
            new_hub_id: None,
            reason: ElectionReason::NoCandidates,
            candidate_count: 0,
        };
    }

    // NodeId order equals hex-string order, so this is the
    // lexicographic tiebreak.
    candidates.sort();

    ElectionResult {
        new_hub_id: Some(candidates[0]),
        reason: ElectionReason::Deterministic,
        candidate_count,
    }
}
