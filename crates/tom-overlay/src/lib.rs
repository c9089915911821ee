//! ToM overlay control and routing plane.
//!
//! A serverless peer-to-peer messaging overlay: signed envelopes over
//! encrypted transports, a self-organising client/relay topology,
//! relay routing with acknowledgements, opportunistic direct-path
//! upgrades, and hub-and-spoke groups with deterministic failover.
//!
//! Wire format: MessagePack. Crypto: Ed25519 signatures +
//! XChaCha20-Poly1305 sealed payloads.

pub mod announce;
pub mod crypto;
pub mod directpath;
pub mod envelope;
pub mod error;
pub mod group;
pub mod identity;
pub mod presence;
pub mod roles;
pub mod router;
pub mod runtime;
pub mod selector;
pub mod topology;
pub mod tracker;
pub mod types;

pub use announce::{PeerAnnounce, RoleAnnounce};
pub use crypto::SealedPayload;
pub use directpath::{
    AttemptOutcome, ConnectionType, ConversationState, DirectPathEvent, DirectPathManager,
};
pub use envelope::{Envelope, EnvelopeBuilder, RouteType};
pub use error::TomOverlayError;
pub use group::{
    elect_hub, ElectionReason, ElectionResult, GroupEvent, GroupId, GroupManager, GroupMember,
    GroupMemberRole, GroupState, MAX_GROUPS,
};
pub use identity::{Identity, IdentityStore, StoredIdentity};
pub use presence::{
    HeartbeatMonitor, LivenessEvent, LivenessState, OfflineDetector, PingStrategy,
    PresenceTransition,
};
pub use roles::{NodeMetrics, RoleAssignment, RoleChange, RoleManager};
pub use router::{AckKind, AckPayload, ReadReceiptPayload, Router, RoutingAction};
pub use runtime::{
    DeliveredMessage, NodeEvent, Runtime, RuntimeChannels, RuntimeCommand, RuntimeConfig,
    RuntimeHandle,
};
pub use selector::{RelaySelection, RelaySelector, SelectionReason};
pub use topology::{PeerInfo, PeerRole, PeerStatus, Topology};
pub use tracker::{MessageStatusEntry, MessageTracker, StatusChange};
pub use types::{now_ms, MessageStatus, MessageType, NodeId};
