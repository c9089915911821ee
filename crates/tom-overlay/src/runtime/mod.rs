/// Overlay runtime — composes every component into a live event loop.
///
/// The runtime owns the transport node and all overlay state (topology,
/// router, tracker, roles, presence, direct paths, groups) and exposes a
/// channel-based API: commands in, delivered messages / status changes /
/// events out. The application never touches raw bytes.
mod effect;
mod executor;
mod r#loop;
mod state;
mod transport;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tom_transport::MemoryNode;

use crate::directpath::ConnectionType;
use crate::group::GroupId;
use crate::identity::Identity;
use crate::presence::PingStrategy;
use crate::topology::{PeerInfo, PeerRole, DEFAULT_STALE_THRESHOLD_MS};
use crate::tracker::StatusChange;
use crate::types::{MessageStatus, MessageType, NodeId};

pub use state::RuntimeState;
pub use transport::Transport;

// ── Configuration ─────────────────────────────────────────────────────

/// Runtime configuration. Every interval and threshold is injectable so
/// tests can compress time.
pub struct RuntimeConfig {
    /// Seal outbound chat payloads end-to-end.
    pub encryption: bool,
    /// Local display name.
    pub username: String,
    /// Stale threshold *T* for derived peer status.
    pub stale_threshold_ms: u64,
    /// Dwell time before an online↔offline transition commits.
    pub debounce_ms: u64,
    /// Heartbeat send + liveness check cadence.
    pub heartbeat_interval: Duration,
    /// Periodic role re-evaluation cadence.
    pub role_eval_interval: Duration,
    /// Tracker cleanup cadence.
    pub tracker_cleanup_interval: Duration,
    /// Age after which read/failed tracker entries are dropped.
    pub tracker_max_age_ms: u64,
    /// Target clients-per-relay ratio R.
    pub clients_per_relay: u32,
    /// Heartbeat send strategy.
    pub ping_strategy: PingStrategy,
    /// Active group cap.
    pub max_groups: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            encryption: true,
            username: "anonymous".to_string(),
            stale_threshold_ms: DEFAULT_STALE_THRESHOLD_MS,
            debounce_ms: crate::presence::DEFAULT_DEBOUNCE_MS,
            heartbeat_interval: Duration::from_secs(1),
            role_eval_interval: Duration::from_secs(60),
            tracker_cleanup_interval: Duration::from_secs(300),
            tracker_max_age_ms: 24 * 60 * 60 * 1000,
            clients_per_relay: crate::roles::DEFAULT_CLIENTS_PER_RELAY,
            ping_strategy: PingStrategy::PerPeer,
            max_groups: crate::group::MAX_GROUPS,
        }
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends into the event loop.
pub enum RuntimeCommand {
    /// Send a chat message. Relay selection, sealing, signing and status
    /// tracking all happen inside.
    SendMessage { to: NodeId, payload: Vec<u8> },
    /// Mark a delivered message read. Sends at most one read receipt per
    /// message id; the reply is `true` only for the first successful send.
    MarkRead {
        message_id: String,
        reply: oneshot::Sender<bool>,
    },
    /// Add or refresh a peer (bootstrap/discovery collaborator input).
    AddPeer { info: PeerInfo },
    /// Remove a peer on explicit leave.
    RemovePeer { node_id: NodeId },
    /// Operator-requested role re-evaluation.
    EvaluateRoles,
    /// Request a direct-path upgrade for a peer.
    AttemptDirectPath { peer: NodeId },
    /// Create a group hosted on the given hub relay.
    CreateGroup {
        name: String,
        hub_id: NodeId,
        members: Vec<NodeId>,
        reply: oneshot::Sender<Result<GroupId, String>>,
    },
    /// Report a group hub as unreachable; triggers the election.
    HubUnreachable { group_id: GroupId },
    /// The bootstrap/signaling collaborator lost its connection.
    SignalingDisconnected,
    /// Query: known peers.
    GetPeers {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    /// Query: lifecycle status of a sent message.
    GetMessageStatus {
        message_id: String,
        reply: oneshot::Sender<Option<MessageStatus>>,
    },
    /// Query: how envelopes to a peer currently travel.
    GetConnectionType {
        peer: NodeId,
        reply: oneshot::Sender<ConnectionType>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// ── Events (runtime → app) ───────────────────────────────────────────

/// A message delivered from the network (verified, unsealed).
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub envelope_id: String,
    pub from: NodeId,
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
    pub timestamp: u64,
    pub was_sealed: bool,
}

/// Operator-visible events.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The signing identity is loaded and the runtime is up.
    IdentityReady { node_id: NodeId },
    /// The node is attached to the transport and processing frames.
    Connected,
    /// The bootstrap/signaling collaborator went away; discovery is
    /// degraded until it returns.
    SignalingDisconnected,
    /// A peer joined or came back online (debounced).
    PeerConnected { node_id: NodeId },
    /// A peer left or went offline (debounced).
    PeerDisconnected { node_id: NodeId },
    /// A peer crossed the stale threshold.
    PeerStale { node_id: NodeId },
    /// An outbound message left this node.
    MessageSent {
        envelope_id: String,
        to: NodeId,
        direct: bool,
    },
    /// We forwarded an envelope as relay.
    MessageForwarded {
        envelope_id: String,
        next_hop: NodeId,
    },
    /// An envelope was rejected (wire-code reason).
    MessageRejected {
        envelope_id: String,
        reason: String,
    },
    /// A relay was chosen for an outbound message.
    RelaySelected { target: NodeId, relay_id: NodeId },
    /// No relay was available for an outbound message.
    RelayNone { target: NodeId, reason: String },
    /// A peer's role set changed.
    RoleChanged {
        node_id: NodeId,
        old_roles: Vec<PeerRole>,
        new_roles: Vec<PeerRole>,
    },
    /// A bounded component hit its capacity.
    CapacityWarning { component: String },
    DirectPathEstablished { peer: NodeId },
    DirectPathLost { peer: NodeId },
    DirectPathRestored { peer: NodeId },
    ReadReceiptSent { message_id: String },
    ReadReceiptFailed { message_id: String },
    /// Periodic tracker cleanup finished.
    CleanupCompleted { removed: usize },
    HubElected {
        group_id: GroupId,
        new_hub_id: NodeId,
    },
    ElectedAsHub { group_id: GroupId },
    HubElectionFailed { group_id: GroupId },
    /// Non-fatal runtime error.
    Error { description: String },
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to a running runtime. Cheap to clone; all methods are channel
/// sends.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_id: NodeId,
}

impl RuntimeHandle {
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub async fn send_message(&self, to: NodeId, payload: Vec<u8>) {
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::SendMessage { to, payload })
            .await;
    }

    /// Mark a delivered message as read. `true` on the first successful
    /// read-receipt send, `false` on repeats or unknown senders.
    pub async fn mark_read(&self, message_id: String) -> bool {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::MarkRead {
                message_id,
                reply: tx,
            })
            .await;
        rx.await.unwrap_or(false)
    }

    pub async fn add_peer(&self, info: PeerInfo) {
        let _ = self.cmd_tx.send(RuntimeCommand::AddPeer { info }).await;
    }

    pub async fn remove_peer(&self, node_id: NodeId) {
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::RemovePeer { node_id })
            .await;
    }

    pub async fn evaluate_roles(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::EvaluateRoles).await;
    }

    pub async fn attempt_direct_path(&self, peer: NodeId) {
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::AttemptDirectPath { peer })
            .await;
    }

    pub async fn create_group(
        &self,
        name: String,
        hub_id: NodeId,
        members: Vec<NodeId>,
    ) -> Result<GroupId, String> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::CreateGroup {
                name,
                hub_id,
                members,
                reply: tx,
            })
            .await;
        rx.await.unwrap_or_else(|_| Err("runtime shut down".into()))
    }

    pub async fn hub_unreachable(&self, group_id: GroupId) {
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::HubUnreachable { group_id })
            .await;
    }

    /// Called by the bootstrap collaborator when its channel drops.
    pub async fn signaling_disconnected(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::SignalingDisconnected).await;
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(RuntimeCommand::GetPeers { reply: tx }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn message_status(&self, message_id: String) -> Option<MessageStatus> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetMessageStatus {
                message_id,
                reply: tx,
            })
            .await;
        rx.await.unwrap_or(None)
    }

    pub async fn connection_type(&self, peer: NodeId) -> ConnectionType {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetConnectionType { peer, reply: tx })
            .await;
        rx.await.unwrap_or(ConnectionType::Relay)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Channels handed to the application when the runtime starts.
pub struct RuntimeChannels {
    pub handle: RuntimeHandle,
    /// Delivered messages (verified, unsealed).
    pub messages: mpsc::Receiver<DeliveredMessage>,
    /// Status changes for sent messages.
    pub status_changes: mpsc::Receiver<StatusChange>,
    /// Operator-visible events.
    pub events: mpsc::Receiver<NodeEvent>,
}

// ── Runtime ──────────────────────────────────────────────────────────

/// The overlay runtime — spawn it and communicate via channels.
pub struct Runtime;

impl Runtime {
    /// Start the runtime on top of an attached transport node.
    ///
    /// The node must have been attached under `identity.node_id()`.
    /// Spawns the event loop as a tokio task; dropping the handle and
    /// channels (or calling `shutdown`) stops it.
    pub fn spawn(node: MemoryNode, identity: Identity, config: RuntimeConfig) -> RuntimeChannels {
        let local_id = identity.node_id();
        debug_assert_eq!(node.id(), local_id, "transport node id must match identity");

        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(64);
        let (msg_tx, msg_rx) = mpsc::channel::<DeliveredMessage>(64);
        let (status_tx, status_rx) = mpsc::channel::<StatusChange>(64);
        let (event_tx, event_rx) = mpsc::channel::<NodeEvent>(64);

        let state = RuntimeState::new(identity, config);

        tokio::spawn(r#loop::runtime_loop(
            node, state, cmd_rx, msg_tx, status_tx, event_tx,
        ));

        RuntimeChannels {
            handle: RuntimeHandle { cmd_tx, local_id },
            messages: msg_rx,
            status_changes: status_rx,
            events: event_rx,
        }
    }
}
