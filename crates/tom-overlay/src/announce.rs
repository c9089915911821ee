//! Bootstrap-layer payloads — peer presence and role announcements.
//!
//! The discovery collaborator exchanges these inside envelopes
//! (`peer-announce`, `role-assign`). Role announcements are signed by the
//! announcing node; verification always uses the real public key (the
//! NodeId), never an echoed key string.

use serde::{Deserialize, Serialize};

use crate::error::TomOverlayError;
use crate::identity::{self, Identity};
use crate::topology::PeerRole;
use crate::types::NodeId;

/// Maximum tolerated clock drift for announcement timestamps (5 min).
pub const MAX_FUTURE_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Announcements older than this are ignored (1 hour).
const MAX_ANNOUNCE_AGE_MS: u64 = 60 * 60 * 1000;

/// What a node broadcasts about itself (`peer-announce` payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAnnounce {
    pub node_id: NodeId,
    pub username: String,
    pub roles: Vec<PeerRole>,
    /// Announcement timestamp (Unix ms).
    pub timestamp: u64,
}

impl PeerAnnounce {
    pub fn new(node_id: NodeId, username: impl Into<String>, roles: Vec<PeerRole>, now: u64) -> Self {
        Self {
            node_id,
            username: username.into(),
            roles,
            timestamp: now,
        }
    }

    /// Whether the timestamp is within acceptable clock drift.
    pub fn is_timestamp_valid(&self, now: u64) -> bool {
        if self.timestamp > now + MAX_FUTURE_DRIFT_MS {
            return false;
        }
        if now > self.timestamp && now - self.timestamp > MAX_ANNOUNCE_AGE_MS {
            return false;
        }
        true
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("PeerAnnounce serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TomOverlayError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Signed role announcement (`role-assign` payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAnnounce {
    pub node_id: NodeId,
    pub roles: Vec<PeerRole>,
    pub score: f64,
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

impl RoleAnnounce {
    /// Create and sign an announcement for the local node.
    pub fn new(identity: &Identity, roles: Vec<PeerRole>, score: f64, now: u64) -> Self {
        let mut announce = Self {
            node_id: identity.node_id(),
            roles,
            score,
            timestamp: now,
            signature: Vec::new(),
        };
        announce.signature = identity.sign(&announce.signing_bytes()).to_vec();
        announce
    }

    /// Verify the signature against the announced node's public key.
    pub fn verify_signature(&self) -> bool {
        identity::verify(&self.node_id, &self.signing_bytes(), &self.signature)
    }

    fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.node_id.as_bytes());
        for role in &self.roles {
            bytes.push(match role {
                PeerRole::Client => 0,
                PeerRole::Relay => 1,
            });
        }
        bytes.extend_from_slice(&self.score.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("RoleAnnounce serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TomOverlayError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}
