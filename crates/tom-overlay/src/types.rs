use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use tom_transport::NodeId;

/// Message type — determines how the overlay handles an envelope.
///
/// Carried on the wire as a plain string (`chat`, `ack/relay`, ...). Types
/// the overlay does not recognise are preserved in `Other` and delivered to
/// the application unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    Chat,
    AckRelay,
    AckDelivery,
    ReadReceipt,
    RoleAssign,
    Heartbeat,
    PeerAnnounce,
    GroupInvite,
    GroupJoin,
    GroupMessage,
    GroupLeave,
    GroupHubMigration,
    /// Unknown type — opaque user payload, routed and delivered as-is.
    Other(String),
}

impl MessageType {
    /// The wire string for this type.
    pub fn as_wire(&self) -> &str {
        match self {
            MessageType::Chat => "chat",
            MessageType::AckRelay => "ack/relay",
            MessageType::AckDelivery => "ack/delivery",
            MessageType::ReadReceipt => "read-receipt",
            MessageType::RoleAssign => "role-assign",
            MessageType::Heartbeat => "heartbeat",
            MessageType::PeerAnnounce => "peer-announce",
            MessageType::GroupInvite => "group/invite",
            MessageType::GroupJoin => "group/join",
            MessageType::GroupMessage => "group/message",
            MessageType::GroupLeave => "group/leave",
            MessageType::GroupHubMigration => "group/hub-migration",
            MessageType::Other(s) => s,
        }
    }

    /// Whether this is one of the three acknowledgement subtypes the
    /// router consumes instead of delivering.
    pub fn is_ack(&self) -> bool {
        matches!(
            self,
            MessageType::AckRelay | MessageType::AckDelivery | MessageType::ReadReceipt
        )
    }
}

impl FromStr for MessageType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "chat" => MessageType::Chat,
            "ack/relay" => MessageType::AckRelay,
            "ack/delivery" => MessageType::AckDelivery,
            "read-receipt" => MessageType::ReadReceipt,
            "role-assign" => MessageType::RoleAssign,
            "heartbeat" => MessageType::Heartbeat,
            "peer-announce" => MessageType::PeerAnnounce,
            "group/invite" => MessageType::GroupInvite,
            "group/join" => MessageType::GroupJoin,
            "group/message" => MessageType::GroupMessage,
            "group/leave" => MessageType::GroupLeave,
            "group/hub-migration" => MessageType::GroupHubMigration,
            other => MessageType::Other(other.to_string()),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("MessageType parse is infallible"))
    }
}

/// Delivery status pipeline for a sent message.
///
/// Progression: Pending -> Sent -> Relayed -> Delivered -> Read, with
/// Failed absorbing from any non-terminal state. Transitions are strictly
/// monotonic; the tracker ignores regressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Sent,
    Relayed,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Position in the pipeline. `Failed` sits outside the pipeline and
    /// has no rank.
    pub fn rank(self) -> Option<u8> {
        match self {
            MessageStatus::Pending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Relayed => Some(2),
            MessageStatus::Delivered => Some(3),
            MessageStatus::Read => Some(4),
            MessageStatus::Failed => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}
