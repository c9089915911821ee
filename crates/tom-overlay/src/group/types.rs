/// Group data structures — hub-and-spoke state per group.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::NodeId;

/// Maximum active groups per node.
pub const MAX_GROUPS: usize = 20;

/// Unique group identifier (`grp-<uuid>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new() -> Self {
        Self(format!("grp-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Role within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMemberRole {
    Admin,
    Member,
}

/// A member in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub node_id: NodeId,
    pub role: GroupMemberRole,
    pub joined_at: u64,
}

/// Full per-group state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    pub group_id: GroupId,
    pub name: String,
    /// The relay at the centre of the star.
    pub hub_id: NodeId,
    pub members: Vec<GroupMember>,
    pub created_at: u64,
    /// Pre-selected failover hub, if nominated.
    pub backup_hub_id: Option<NodeId>,
    /// Set when an election found no candidates; cleared once a hub is
    /// elected again.
    #[serde(default)]
    pub degraded: bool,
}

impl GroupState {
    pub fn is_member(&self, node_id: &NodeId) -> bool {
        self.members.iter().any(|m| m.node_id == *node_id)
    }

    pub fn is_admin(&self, node_id: &NodeId) -> bool {
        self.members
            .iter()
            .any(|m| m.node_id == *node_id && m.role == GroupMemberRole::Admin)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Group-protocol payload, serialized into `Envelope.payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupPayload {
    /// Invitation to join (hub → invitee).
    Invite {
        group_id: GroupId,
        group_name: String,
        inviter_id: NodeId,
        hub_id: NodeId,
    },
    /// Join request (invitee → hub).
    Join { group_id: GroupId, username: String },
    /// Chat message within the group (member → hub, hub → members).
    Message {
        group_id: GroupId,
        sender_id: NodeId,
        text: String,
        sent_at: u64,
    },
    /// Voluntary leave (member → hub).
    Leave { group_id: GroupId },
    /// Hub announces migration to a new hub (hub → members).
    HubMigration {
        group_id: GroupId,
        new_hub_id: NodeId,
        old_hub_id: NodeId,
    },
}

impl GroupPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("GroupPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, crate::error::TomOverlayError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}
