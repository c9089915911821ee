//! ToM overlay transport layer.
//!
//! Defines the node identity (`NodeId`) and the peer-channel contract the
//! overlay consumes: connect, send, disconnect, close, plus an inbound
//! stream and connection lifecycle events.
//!
//! The production substrate (QUIC with hole punching, or WebRTC data
//! channels over a signaling bootstrap) lives behind the same contract;
//! this crate ships `MemoryNetwork`, an in-process implementation used by
//! tests and local multi-node deployments.

mod error;
mod memory;

pub use error::TomTransportError;
pub use memory::{ConnEvent, MemoryLink, MemoryNetwork, MemoryNode};

use std::fmt;
use std::str::FromStr;

/// ToM network identity — a 32-byte Ed25519 public key.
///
/// Displayed and parsed as 64-character lowercase hex. Ordering is byte
/// order, which coincides with lexicographic order of the hex form — the
/// deterministic tiebreak used throughout the overlay.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Create from raw public key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw 32-byte public key.
    pub fn as_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// 64-char lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "NodeId({}...)", &hex[..12])
    }
}

impl FromStr for NodeId {
    type Err = TomTransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(TomTransportError::InvalidNodeId(s.to_string()));
        }
        let raw = hex::decode(s).map_err(|_| TomTransportError::InvalidNodeId(s.to_string()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| TomTransportError::InvalidNodeId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl serde::Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
