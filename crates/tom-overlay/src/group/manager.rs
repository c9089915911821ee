/// Group manager — tracks group state and drives hub failover.
///
/// Elections are idempotent per group: a second `hub_unavailable` for a
/// hub that already migrated is a no-op, and a group that found no
/// candidates sits in `degraded` until a relay turns up.
use std::collections::HashMap;

use crate::error::TomOverlayError;
use crate::group::election::{elect_hub, ElectionReason};
use crate::group::types::{GroupId, GroupMember, GroupMemberRole, GroupState, MAX_GROUPS};
use crate::topology::Topology;
use crate::types::NodeId;

/// Outcome of group operations, surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    /// A new hub was elected for the group.
    HubElected {
        group_id: GroupId,
        new_hub_id: NodeId,
    },
    /// The local node is the newly elected hub.
    ElectedAsHub { group_id: GroupId },
    /// No candidates — the group is degraded until relays reappear.
    ElectionFailed { group_id: GroupId },
    /// A hub migration announced by the (old) hub was applied.
    HubMigrated {
        group_id: GroupId,
        new_hub_id: NodeId,
        old_hub_id: NodeId,
    },
}

pub struct GroupManager {
    local_id: NodeId,
    max_groups: usize,
    groups: HashMap<GroupId, GroupState>,
}

impl GroupManager {
    pub fn new(local_id: NodeId) -> Self {
        Self::with_limit(local_id, MAX_GROUPS)
    }

    pub fn with_limit(local_id: NodeId, max_groups: usize) -> Self {
        Self {
            local_id,
            max_groups,
            groups: HashMap::new(),
        }
    }

    /// Create a group with the local node as admin.
    pub fn create_group(
        &mut self,
        name: impl Into<String>,
        hub_id: NodeId,
        initial_members: &[NodeId],
        now: u64,
    ) -> Result<GroupId, TomOverlayError> {
        if self.groups.len() >= self.max_groups {
            return Err(TomOverlayError::GroupLimitReached(self.max_groups));
        }

        let group_id = GroupId::new();
        let mut members = vec![GroupMember {
            node_id: self.local_id,
            role: GroupMemberRole::Admin,
            joined_at: now,
        }];
        for &node_id in initial_members {
            if node_id != self.local_id {
                members.push(GroupMember {
                    node_id,
                    role: GroupMemberRole::Member,
                    joined_at: now,
                });
            }
        }

        self.groups.insert(
            group_id.clone(),
            GroupState {
                group_id: group_id.clone(),
                name: name.into(),
                hub_id,
                members,
                created_at: now,
                backup_hub_id: None,
                degraded: false,
            },
        );
        Ok(group_id)
    }

    pub fn get(&self, group_id: &GroupId) -> Option<&GroupState> {
        self.groups.get(group_id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupState> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn remove_group(&mut self, group_id: &GroupId) -> bool {
        self.groups.remove(group_id).is_some()
    }

    /// Record the nominated backup hub for a group.
    pub fn set_backup_hub(&mut self, group_id: &GroupId, backup: Option<NodeId>) {
        if let Some(group) = self.groups.get_mut(group_id) {
            group.backup_hub_id = backup;
        }
    }

    pub fn add_member(&mut self, group_id: &GroupId, node_id: NodeId, now: u64) -> bool {
        let Some(group) = self.groups.get_mut(group_id) else {
            return false;
        };
        if group.is_member(&node_id) {
            return false;
        }
        group.members.push(GroupMember {
            node_id,
            role: GroupMemberRole::Member,
            joined_at: now,
        });
        true
    }

    pub fn remove_member(&mut self, group_id: &GroupId, node_id: &NodeId) -> bool {
        let Some(group) = self.groups.get_mut(group_id) else {
            return false;
        };
        let before = group.members.len();
        group.members.retain(|m| m.node_id != *node_id);
        group.members.len() != before
    }

    /// The hub of `group_id` was detected unavailable — run the election.
    ///
    /// Idempotent: re-running for a hub that already migrated returns
    /// nothing, and a degraded group only re-runs once candidates exist.
    pub fn hub_unavailable(
        &mut self,
        group_id: &GroupId,
        failed_hub: &NodeId,
        topology: &Topology,
        now: u64,
    ) -> Vec<GroupEvent> {
        let Some(group) = self.groups.get(group_id) else {
            return Vec::new();
        };
        if group.hub_id != *failed_hub {
            // Already migrated away from this hub.
            return Vec::new();
        }

        let result = elect_hub(group, failed_hub, topology, now);
        let group = self.groups.get_mut(group_id).expect("checked above");

        match result.new_hub_id {
            Some(new_hub_id) => {
                group.hub_id = new_hub_id;
                group.degraded = false;
                if group.backup_hub_id == Some(new_hub_id) {
                    group.backup_hub_id = None;
                }
                tracing::debug!(group = %group_id, hub = %new_hub_id, reason = ?result.reason, "hub elected");
                if new_hub_id == self.local_id {
                    vec![GroupEvent::ElectedAsHub {
                        group_id: group_id.clone(),
                    }]
                } else {
                    vec![GroupEvent::HubElected {
                        group_id: group_id.clone(),
                        new_hub_id,
                    }]
                }
            }
            None => {
                debug_assert_eq!(result.reason, ElectionReason::NoCandidates);
                if group.degraded {
                    // Already reported; stay quiet until candidates appear.
                    return Vec::new();
                }
                group.degraded = true;
                tracing::warn!(group = %group_id, "hub election failed: no candidates");
                vec![GroupEvent::ElectionFailed {
                    group_id: group_id.clone(),
                }]
            }
        }
    }

    /// A relay came online — retry elections for every degraded group.
    pub fn retry_degraded(&mut self, topology: &Topology, now: u64) -> Vec<GroupEvent> {
        let degraded: Vec<(GroupId, NodeId)> = self
            .groups
            .values()
            .filter(|g| g.degraded)
            .map(|g| (g.group_id.clone(), g.hub_id))
            .collect();

        let mut events = Vec::new();
        for (group_id, failed_hub) in degraded {
            // Clear the flag so the election actually re-runs.
            if let Some(group) = self.groups.get_mut(&group_id) {
                group.degraded = false;
            }
            let outcome = self.hub_unavailable(&group_id, &failed_hub, topology, now);
            // A still-failing election re-degrades and re-reports nothing new.
            events.extend(
                outcome
                    .into_iter()
                    .filter(|e| !matches!(e, GroupEvent::ElectionFailed { .. })),
            );
        }
        events
    }

    /// Apply a `group/hub-migration` announcement from the wire.
    pub fn apply_migration(
        &mut self,
        group_id: &GroupId,
        new_hub_id: NodeId,
        old_hub_id: NodeId,
    ) -> Option<GroupEvent> {
        let group = self.groups.get_mut(group_id)?;
        if group.hub_id != old_hub_id || group.hub_id == new_hub_id {
            return None;
        }
        group.hub_id = new_hub_id;
        group.degraded = false;
        Some(GroupEvent::HubMigrated {
            group_id: group_id.clone(),
            new_hub_id,
            old_hub_id,
        })
    }
}
