use std::collections::{HashMap, HashSet};

use crate::announce::{PeerAnnounce, RoleAnnounce};
use crate::directpath::{AttemptOutcome, ConnectionType, DirectPathEvent, DirectPathManager};
use crate::envelope::{Envelope, EnvelopeBuilder, RouteType};
use crate::group::{GroupEvent, GroupId, GroupManager, GroupPayload};
use crate::identity::Identity;
use crate::presence::{HeartbeatAction, HeartbeatMonitor, LivenessEvent, OfflineDetector};
use crate::router::{AckKind, ReadReceiptPayload, Router, RoutingAction};
use crate::selector::RelaySelector;
use crate::topology::{PeerInfo, PeerStatus, Topology};
use crate::tracker::MessageTracker;
use crate::types::{now_ms, MessageType, NodeId};

use super::effect::RuntimeEffect;
use super::{DeliveredMessage, NodeEvent, RuntimeCommand, RuntimeConfig};

/// Complete overlay state — pure logic, zero async, zero network.
///
/// Every `handle_*` / `tick_*` method returns `Vec<RuntimeEffect>` for
/// the loop to execute. The state exclusively owns the topology, router,
/// role manager, relay selector, direct-path manager and tracker.
pub struct RuntimeState {
    pub(crate) local_id: NodeId,
    pub(crate) identity: Identity,
    pub(crate) config: RuntimeConfig,

    pub(crate) topology: Topology,
    pub(crate) router: Router,
    pub(crate) tracker: MessageTracker,
    pub(crate) selector: RelaySelector,
    pub(crate) roles: crate::roles::RoleManager,
    pub(crate) heartbeat: HeartbeatMonitor,
    pub(crate) presence: OfflineDetector,
    pub(crate) direct: DirectPathManager,
    pub(crate) groups: GroupManager,

    /// Delivered message id → sender, for read-receipt routing.
    message_senders: HashMap<String, NodeId>,
    /// Message ids a read receipt was already sent for (one-shot).
    read_receipts_sent: HashSet<String>,
}

impl RuntimeState {
    pub fn new(identity: Identity, config: RuntimeConfig) -> Self {
        let local_id = identity.node_id();
        // The local node sits in its own topology so role evaluation
        // covers it; tick_heartbeat keeps its last_seen fresh.
        let mut topology = Topology::with_threshold(config.stale_threshold_ms);
        topology.add_peer(PeerInfo::new(local_id, config.username.clone(), now_ms()));
        Self {
            topology,
            router: Router::new(local_id),
            tracker: MessageTracker::new(),
            selector: RelaySelector::new(local_id),
            roles: crate::roles::RoleManager::with_ratio(local_id, config.clients_per_relay),
            heartbeat: HeartbeatMonitor::new(config.stale_threshold_ms, config.ping_strategy),
            presence: OfflineDetector::new(config.debounce_ms),
            direct: DirectPathManager::new(local_id),
            groups: GroupManager::with_limit(local_id, config.max_groups),
            message_senders: HashMap::new(),
            read_receipts_sent: HashSet::new(),
            local_id,
            identity,
            config,
        }
    }

    // ── Inbound frames ───────────────────────────────────────────────

    pub fn handle_incoming(&mut self, data: &[u8]) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let envelope = match Envelope::from_bytes(data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!("dropping undecodable frame: {e}");
                return vec![RuntimeEffect::Emit(NodeEvent::MessageRejected {
                    envelope_id: String::new(),
                    reason: "INVALID_ENVELOPE".into(),
                })];
            }
        };
        let envelope_id = envelope.id.clone();

        match self.router.route(envelope, now) {
            RoutingAction::Deliver { envelope, response } => self.handle_deliver(envelope, response, now),
            RoutingAction::AckReceived {
                original_message_id,
                kind,
                from,
            } => self.handle_ack(original_message_id, kind, from, now),
            RoutingAction::ReadReceiptReceived {
                original_message_id,
                read_at,
                from,
            } => {
                self.observe_peer_alive(from, now);
                self.tracker
                    .mark_read(&original_message_id, read_at)
                    .map(RuntimeEffect::StatusChange)
                    .into_iter()
                    .collect()
            }
            RoutingAction::Forward {
                envelope,
                next_hop,
                relay_ack,
            } => self.handle_forward(envelope, next_hop, relay_ack, now),
            RoutingAction::Reject { reason } => {
                tracing::debug!(envelope_id, reason, "envelope rejected");
                vec![RuntimeEffect::Emit(NodeEvent::MessageRejected {
                    envelope_id,
                    reason,
                })]
            }
            RoutingAction::Drop => Vec::new(),
        }
    }

    fn handle_deliver(
        &mut self,
        mut envelope: Envelope,
        mut response: Envelope,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        self.observe_peer_alive(envelope.from, now);

        // Overlay-internal types never reach the application.
        match envelope.msg_type {
            MessageType::Heartbeat => return Vec::new(),
            MessageType::PeerAnnounce => return self.handle_peer_announce(&envelope, now),
            MessageType::RoleAssign => return self.handle_role_assign(&envelope, now),
            _ => {}
        }

        self.direct.note_message(envelope.from, now);
        self.message_senders
            .insert(envelope.id.clone(), envelope.from);

        let was_sealed = envelope.sealed;
        if envelope.sealed {
            let seed = self.identity.seed();
            if envelope.open_payload(&seed).is_err() {
                // Not for our key — drop silently.
                tracing::debug!(envelope_id = envelope.id, "unsealing failed, dropping");
                return Vec::new();
            }
        }

        let mut effects = Vec::new();

        if envelope.msg_type == MessageType::GroupHubMigration {
            if let Ok(GroupPayload::HubMigration {
                group_id,
                new_hub_id,
                old_hub_id,
            }) = GroupPayload::from_bytes(&envelope.payload)
            {
                if let Some(event) = self.groups.apply_migration(&group_id, new_hub_id, old_hub_id) {
                    effects.extend(self.surface_group_event(event));
                }
            }
        }

        // The ack goes back through the relay adjacent to us, if the
        // message came over one.
        let ack_hop = envelope.via.last().copied().unwrap_or(envelope.from);
        response.sign(&self.identity);
        effects.push(RuntimeEffect::SendEnvelopeTo {
            target: ack_hop,
            envelope: response,
        });
        effects.push(RuntimeEffect::DeliverMessage(DeliveredMessage {
            envelope_id: envelope.id,
            from: envelope.from,
            msg_type: envelope.msg_type,
            payload: envelope.payload,
            timestamp: envelope.timestamp,
            was_sealed,
        }));
        effects
    }

    fn handle_ack(
        &mut self,
        original_message_id: String,
        kind: AckKind,
        from: NodeId,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        self.observe_peer_alive(from, now);
        let change = match kind {
            AckKind::Relay => {
                // The relay proved it forwarded for us.
                self.roles.record_relay(from, now);
                self.tracker.mark_relayed(&original_message_id, now)
            }
            AckKind::Delivery => self.tracker.mark_delivered(&original_message_id, now),
        };
        change.map(RuntimeEffect::StatusChange).into_iter().collect()
    }

    fn handle_forward(
        &mut self,
        envelope: Envelope,
        next_hop: NodeId,
        mut relay_ack: Envelope,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        self.observe_peer_alive(envelope.from, now);

        if self.topology.status_of(&next_hop, now) == PeerStatus::Offline {
            return vec![RuntimeEffect::Emit(NodeEvent::MessageRejected {
                envelope_id: envelope.id,
                reason: "PEER_UNREACHABLE".into(),
            })];
        }

        // Count our own relay contribution.
        self.roles.record_relay(self.local_id, now);
        self.roles
            .record_bytes_relayed(self.local_id, envelope.payload.len() as u64, now);

        relay_ack.sign(&self.identity);
        let envelope_id = envelope.id.clone();
        vec![
            RuntimeEffect::SendEnvelopeTo {
                target: next_hop,
                envelope,
            },
            RuntimeEffect::SendEnvelope(relay_ack),
            RuntimeEffect::Emit(NodeEvent::MessageForwarded {
                envelope_id,
                next_hop,
            }),
        ]
    }

    fn handle_peer_announce(&mut self, envelope: &Envelope, now: u64) -> Vec<RuntimeEffect> {
        let Ok(announce) = PeerAnnounce::from_bytes(&envelope.payload) else {
            return Vec::new();
        };
        if announce.node_id != envelope.from || !announce.is_timestamp_valid(now) {
            tracing::debug!(from = %envelope.from, "ignoring inconsistent peer announce");
            return Vec::new();
        }
        let info = PeerInfo {
            node_id: announce.node_id,
            username: announce.username,
            reachable_via: Vec::new(),
            last_seen: now,
            roles: announce.roles,
        };
        self.add_peer(info)
    }

    fn handle_role_assign(&mut self, envelope: &Envelope, now: u64) -> Vec<RuntimeEffect> {
        let Ok(announce) = RoleAnnounce::from_bytes(&envelope.payload) else {
            return Vec::new();
        };
        // Verification uses the announced node's real public key.
        if announce.node_id != envelope.from || !announce.verify_signature() {
            tracing::debug!(from = %envelope.from, "ignoring unverifiable role announce");
            return Vec::new();
        }
        let mut effects = Vec::new();
        if let Some(change) =
            self.roles
                .apply_remote(announce.node_id, announce.roles, &mut self.topology, now)
        {
            let became_relay = change.new_roles.contains(&crate::topology::PeerRole::Relay);
            effects.push(RuntimeEffect::Emit(NodeEvent::RoleChanged {
                node_id: change.node_id,
                old_roles: change.old_roles,
                new_roles: change.new_roles,
            }));
            if became_relay {
                effects.extend(self.retry_degraded_groups(now));
            }
        }
        effects
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn handle_command(&mut self, command: RuntimeCommand) -> Vec<RuntimeEffect> {
        match command {
            RuntimeCommand::SendMessage { to, payload } => self.handle_send_message(to, payload),
            RuntimeCommand::AddPeer { info } => self.add_peer(info),
            RuntimeCommand::RemovePeer { node_id } => self.remove_peer(node_id),
            RuntimeCommand::EvaluateRoles => {
                let now = now_ms();
                self.evaluate_roles(now)
            }
            RuntimeCommand::HubUnreachable { group_id } => {
                let now = now_ms();
                self.hub_unreachable(&group_id, now)
            }
            RuntimeCommand::SignalingDisconnected => {
                vec![RuntimeEffect::Emit(NodeEvent::SignalingDisconnected)]
            }
            // Query and reply-carrying commands are resolved by the loop.
            _ => Vec::new(),
        }
    }

    fn handle_send_message(&mut self, to: NodeId, payload: Vec<u8>) -> Vec<RuntimeEffect> {
        let now = now_ms();
        if to == self.local_id {
            return vec![RuntimeEffect::Emit(NodeEvent::MessageRejected {
                envelope_id: String::new(),
                reason: "recipient-is-self".into(),
            })];
        }

        let builder = EnvelopeBuilder::new(self.local_id, to, MessageType::Chat, payload);
        let mut envelope = if self.config.encryption {
            match builder.seal_and_sign(&self.identity, &to.as_bytes()) {
                Ok(env) => env,
                Err(e) => {
                    return vec![RuntimeEffect::Emit(NodeEvent::Error {
                        description: format!("sealing failed: {e}"),
                    })]
                }
            }
        } else {
            builder.sign(&self.identity)
        };
        let envelope_id = envelope.id.clone();

        let mut effects = Vec::new();
        if !self.tracker.track(&envelope_id, to, now) {
            effects.push(RuntimeEffect::Emit(NodeEvent::CapacityWarning {
                component: "tracker".into(),
            }));
        }
        self.direct.note_message(to, now);

        // Direct path first (route_type is transit metadata, outside the
        // signing preimage).
        if self.direct.connection_type(&to) == ConnectionType::Direct {
            envelope.route_type = Some(RouteType::Direct);
            effects.push(RuntimeEffect::SendTracked {
                target: to,
                envelope,
                direct: true,
            });
            return effects;
        }

        let selection = self.selector.select_best(to, &self.topology, &self.roles, now);
        match selection.relay_id {
            Some(relay_id) => {
                envelope.route_type = Some(RouteType::Relay);
                effects.push(RuntimeEffect::Emit(NodeEvent::RelaySelected {
                    target: to,
                    relay_id,
                }));
                effects.push(RuntimeEffect::SendTracked {
                    target: relay_id,
                    envelope,
                    direct: false,
                });
            }
            None => {
                effects.push(RuntimeEffect::Emit(NodeEvent::RelayNone {
                    target: to,
                    reason: selection.reason.as_str().into(),
                }));
                if self.topology.status_of(&to, now) != PeerStatus::Offline {
                    // No relay, but the peer itself is reachable.
                    envelope.route_type = Some(RouteType::Direct);
                    effects.push(RuntimeEffect::SendTracked {
                        target: to,
                        envelope,
                        direct: true,
                    });
                } else {
                    if let Some(change) = self.tracker.mark_failed(&envelope_id, now) {
                        effects.push(RuntimeEffect::StatusChange(change));
                    }
                    effects.push(RuntimeEffect::Emit(NodeEvent::MessageRejected {
                        envelope_id,
                        reason: "PEER_UNREACHABLE".into(),
                    }));
                }
            }
        }
        effects
    }

    /// The loop reports a tracked send that left the transport.
    pub fn on_send_ok(&mut self, message_id: &str, to: NodeId, direct: bool) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let mut effects = Vec::new();
        if let Some(change) = self.tracker.mark_sent(message_id, now) {
            effects.push(RuntimeEffect::StatusChange(change));
        }
        effects.push(RuntimeEffect::Emit(NodeEvent::MessageSent {
            envelope_id: message_id.to_string(),
            to,
            direct,
        }));
        effects
    }

    /// The loop reports a tracked send that failed at the transport.
    pub fn on_send_failed(
        &mut self,
        message_id: &str,
        to: NodeId,
        target: NodeId,
    ) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let reason = if target == to {
            "TRANSPORT_FAILED"
        } else {
            // The chosen relay did not take the message.
            self.roles.record_relay_failure(target, now);
            "RELAY_UNREACHABLE"
        };
        let mut effects = Vec::new();
        if let Some(change) = self.tracker.mark_failed(message_id, now) {
            effects.push(RuntimeEffect::StatusChange(change));
        }
        effects.push(RuntimeEffect::Emit(NodeEvent::MessageRejected {
            envelope_id: message_id.to_string(),
            reason: reason.into(),
        }));
        effects
    }

    // ── Peers ────────────────────────────────────────────────────────

    fn add_peer(&mut self, info: PeerInfo) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let node_id = info.node_id;
        let is_new = self.topology.get(&node_id).is_none();

        self.topology.add_peer(info);
        self.heartbeat.track_peer(node_id, now);
        self.presence.observe(node_id, true, now);

        let mut effects = Vec::new();
        if is_new {
            effects.push(RuntimeEffect::Emit(NodeEvent::PeerConnected { node_id }));
        }
        // Topology change triggers re-evaluation.
        effects.extend(self.evaluate_roles(now));
        effects.extend(self.retry_degraded_groups(now));
        effects
    }

    fn remove_peer(&mut self, node_id: NodeId) -> Vec<RuntimeEffect> {
        let now = now_ms();
        if !self.topology.remove_peer(&node_id) {
            return Vec::new();
        }
        self.heartbeat.untrack_peer(&node_id);
        self.presence.forget(&node_id);
        self.roles.remove_node(&node_id);

        let mut effects = Vec::new();
        if let Some(DirectPathEvent::Lost { peer }) = self.direct.path_lost(node_id) {
            effects.push(RuntimeEffect::Emit(NodeEvent::DirectPathLost { peer }));
            effects.push(RuntimeEffect::Disconnect { peer });
        }
        self.direct.forget(&node_id);

        effects.extend(self.hubs_down(node_id, now));
        effects.push(RuntimeEffect::Emit(NodeEvent::PeerDisconnected { node_id }));
        effects.extend(self.evaluate_roles(now));
        effects
    }

    fn observe_peer_alive(&mut self, node_id: NodeId, now: u64) {
        if node_id == self.local_id {
            return;
        }
        self.topology.update_last_seen(&node_id, now);
        self.heartbeat.record_heartbeat(node_id, now);
        self.presence.observe(node_id, true, now);
    }

    // ── Roles ────────────────────────────────────────────────────────

    fn evaluate_roles(&mut self, now: u64) -> Vec<RuntimeEffect> {
        let changes = self.roles.evaluate(&mut self.topology, now);
        let mut effects = Vec::new();
        let mut local_changed = false;
        let mut relay_appeared = false;

        for change in changes {
            if change.node_id == self.local_id {
                local_changed = true;
            }
            if change.new_roles.contains(&crate::topology::PeerRole::Relay) {
                relay_appeared = true;
            }
            effects.push(RuntimeEffect::Emit(NodeEvent::RoleChanged {
                node_id: change.node_id,
                old_roles: change.old_roles,
                new_roles: change.new_roles,
            }));
        }

        if local_changed {
            effects.extend(self.broadcast_local_roles(now));
        }
        if relay_appeared {
            effects.extend(self.retry_degraded_groups(now));
        }
        effects
    }

    /// Announce the local node's roles to every reachable peer.
    fn broadcast_local_roles(&mut self, now: u64) -> Vec<RuntimeEffect> {
        let announce = RoleAnnounce::new(
            &self.identity,
            self.roles.local_roles(),
            self.roles.score(&self.local_id),
            now,
        );
        let payload = announce.to_bytes();

        let targets: Vec<NodeId> = self
            .topology
            .reachable_peers(now)
            .into_iter()
            .map(|p| p.node_id)
            .filter(|id| *id != self.local_id)
            .collect();

        targets
            .into_iter()
            .map(|target| {
                let envelope = EnvelopeBuilder::new(
                    self.local_id,
                    target,
                    MessageType::RoleAssign,
                    payload.clone(),
                )
                .sign(&self.identity);
                RuntimeEffect::SendEnvelopeTo { target, envelope }
            })
            .collect()
    }

    // ── Ticks ────────────────────────────────────────────────────────

    pub fn tick_heartbeat(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let mut effects = Vec::new();
        self.topology.update_last_seen(&self.local_id, now);

        // 1. Outbound heartbeats per the injected strategy.
        for action in self.heartbeat.tick_send() {
            match action {
                HeartbeatAction::Ping { peer } => {
                    effects.push(self.heartbeat_envelope(peer));
                }
                HeartbeatAction::Broadcast => {
                    let targets: Vec<NodeId> = self
                        .topology
                        .reachable_peers(now)
                        .into_iter()
                        .map(|p| p.node_id)
                        .collect();
                    for peer in targets {
                        effects.push(self.heartbeat_envelope(peer));
                    }
                }
            }
        }

        // 2. Liveness tier crossings feed the debouncer.
        for event in self.heartbeat.check(now) {
            match event {
                LivenessEvent::PeerStale { node_id } => {
                    effects.push(RuntimeEffect::Emit(NodeEvent::PeerStale { node_id }));
                }
                LivenessEvent::PeerDeparted { node_id } => {
                    self.presence.observe(node_id, false, now);
                }
                LivenessEvent::PeerBack { node_id } => {
                    self.presence.observe(node_id, true, now);
                }
            }
        }

        // 3. Commit debounced transitions.
        let mut came_online = Vec::new();
        for transition in self.presence.poll(now) {
            let node_id = transition.node_id;
            if transition.online {
                effects.push(RuntimeEffect::Emit(NodeEvent::PeerConnected { node_id }));
                came_online.push(node_id);
            } else {
                effects.push(RuntimeEffect::Emit(NodeEvent::PeerDisconnected { node_id }));
                if let Some(DirectPathEvent::Lost { peer }) = self.direct.path_lost(node_id) {
                    effects.push(RuntimeEffect::Emit(NodeEvent::DirectPathLost { peer }));
                    effects.push(RuntimeEffect::Disconnect { peer });
                }
                effects.extend(self.hubs_down(node_id, now));
            }
        }

        // 4. Reconnect plans for peers we had a direct path with.
        for (peer, delay_ms) in self.direct.on_peers_online(&came_online, now) {
            effects.push(RuntimeEffect::ScheduleDirectAttempt { peer, delay_ms });
        }
        if !came_online.is_empty() {
            effects.extend(self.retry_degraded_groups(now));
        }

        effects
    }

    fn heartbeat_envelope(&self, peer: NodeId) -> RuntimeEffect {
        let envelope = EnvelopeBuilder::new(self.local_id, peer, MessageType::Heartbeat, Vec::new())
            .sign(&self.identity);
        RuntimeEffect::SendEnvelopeTo {
            target: peer,
            envelope,
        }
    }

    pub fn tick_roles(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        self.roles.observe_snapshot(&self.topology, now);
        self.evaluate_roles(now)
    }

    pub fn tick_tracker_cleanup(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let removed = self.tracker.cleanup(self.config.tracker_max_age_ms, now);
        vec![RuntimeEffect::Emit(NodeEvent::CleanupCompleted { removed })]
    }

    // ── Connection events ────────────────────────────────────────────

    pub fn handle_conn_event(&mut self, event: tom_transport::ConnEvent) -> Vec<RuntimeEffect> {
        match event {
            tom_transport::ConnEvent::Closed { peer } => {
                match self.direct.path_lost(peer) {
                    Some(DirectPathEvent::Lost { peer }) => {
                        vec![RuntimeEffect::Emit(NodeEvent::DirectPathLost { peer })]
                    }
                    _ => Vec::new(),
                }
            }
            tom_transport::ConnEvent::Opened { .. } => Vec::new(),
        }
    }

    // ── Direct path (driven by the loop) ─────────────────────────────

    /// A scheduled or requested attempt is due. `true` → the loop should
    /// call `transport.connect` and report back.
    pub fn direct_attempt_due(&mut self, peer: NodeId) -> bool {
        matches!(self.direct.attempt(peer, now_ms()), AttemptOutcome::Connect)
    }

    pub fn direct_connect_finished(&mut self, peer: NodeId, ok: bool) -> Vec<RuntimeEffect> {
        let now = now_ms();
        if !ok {
            self.direct.connect_failed(peer, now);
            return Vec::new();
        }
        match self.direct.connect_succeeded(peer) {
            Some(DirectPathEvent::Established { peer }) => {
                vec![RuntimeEffect::Emit(NodeEvent::DirectPathEstablished { peer })]
            }
            Some(DirectPathEvent::Restored { peer }) => {
                vec![RuntimeEffect::Emit(NodeEvent::DirectPathRestored { peer })]
            }
            _ => Vec::new(),
        }
    }

    // ── Read receipts (one-shot) ─────────────────────────────────────

    /// Build the read receipt for a delivered message, if one may still
    /// be sent. Returns `(first_hop, signed_envelope)`.
    pub fn prepare_read_receipt(&mut self, message_id: &str) -> Option<(NodeId, Envelope)> {
        let sender = *self.message_senders.get(message_id)?;
        if self.read_receipts_sent.contains(message_id) {
            return None;
        }
        let now = now_ms();
        let payload = ReadReceiptPayload {
            original_message_id: message_id.to_string(),
            read_at: now,
        }
        .to_bytes();
        let envelope =
            EnvelopeBuilder::new(self.local_id, sender, MessageType::ReadReceipt, payload)
                .sign(&self.identity);

        let hop = if self.direct.connection_type(&sender) == ConnectionType::Direct {
            sender
        } else {
            self.selector
                .select_best(sender, &self.topology, &self.roles, now)
                .relay_id
                .unwrap_or(sender)
        };
        Some((hop, envelope))
    }

    /// The read receipt left the transport — latch the one-shot.
    pub fn read_receipt_sent(&mut self, message_id: &str) -> Vec<RuntimeEffect> {
        self.read_receipts_sent.insert(message_id.to_string());
        vec![RuntimeEffect::Emit(NodeEvent::ReadReceiptSent {
            message_id: message_id.to_string(),
        })]
    }

    // ── Groups ───────────────────────────────────────────────────────

    pub fn create_group(
        &mut self,
        name: String,
        hub_id: NodeId,
        members: &[NodeId],
    ) -> Result<GroupId, String> {
        let now = now_ms();
        let group_id = self
            .groups
            .create_group(name, hub_id, members, now)
            .map_err(|e| e.to_string())?;
        let backup = self.roles.backup_hub_nominee(&hub_id, &self.topology, now);
        self.groups.set_backup_hub(&group_id, backup);
        Ok(group_id)
    }

    pub fn hub_unreachable(&mut self, group_id: &GroupId, now: u64) -> Vec<RuntimeEffect> {
        let Some(hub) = self.groups.get(group_id).map(|g| g.hub_id) else {
            return Vec::new();
        };
        let events = self
            .groups
            .hub_unavailable(group_id, &hub, &self.topology, now);
        events
            .into_iter()
            .flat_map(|e| self.surface_group_event(e))
            .collect()
    }

    /// Elections for every group whose hub is `node_id`.
    fn hubs_down(&mut self, node_id: NodeId, now: u64) -> Vec<RuntimeEffect> {
        let affected: Vec<GroupId> = self
            .groups
            .groups()
            .filter(|g| g.hub_id == node_id)
            .map(|g| g.group_id.clone())
            .collect();
        let mut effects = Vec::new();
        for group_id in affected {
            let events = self
                .groups
                .hub_unavailable(&group_id, &node_id, &self.topology, now);
            for event in events {
                effects.extend(self.surface_group_event(event));
            }
        }
        effects
    }

    fn retry_degraded_groups(&mut self, now: u64) -> Vec<RuntimeEffect> {
        let events = self.groups.retry_degraded(&self.topology, now);
        events
            .into_iter()
            .flat_map(|e| self.surface_group_event(e))
            .collect()
    }

    fn surface_group_event(&self, event: GroupEvent) -> Vec<RuntimeEffect> {
        let node_event = match event {
            GroupEvent::HubElected {
                group_id,
                new_hub_id,
            }
            | GroupEvent::HubMigrated {
                group_id,
                new_hub_id,
                ..
            } => NodeEvent::HubElected {
                group_id,
                new_hub_id,
            },
            GroupEvent::ElectedAsHub { group_id } => NodeEvent::ElectedAsHub { group_id },
            GroupEvent::ElectionFailed { group_id } => NodeEvent::HubElectionFailed { group_id },
        };
        vec![RuntimeEffect::Emit(node_event)]
    }

    // ── Queries (loop-side) ──────────────────────────────────────────

    pub fn peers_snapshot(&self) -> Vec<PeerInfo> {
        self.topology.peers().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::PeerRole;

    fn identity(seed: u8) -> Identity {
        Identity::from_seed(&[seed; 32])
    }

    fn node_id(seed: u8) -> NodeId {
        identity(seed).node_id()
    }

    fn state(seed: u8) -> RuntimeState {
        RuntimeState::new(identity(seed), RuntimeConfig::default())
    }

    fn peer_info(seed: u8, now: u64) -> PeerInfo {
        PeerInfo::new(node_id(seed), format!("peer-{seed}"), now)
    }

    fn find_sent<'a>(effects: &'a [RuntimeEffect], msg_type: &MessageType) -> Option<&'a Envelope> {
        effects.iter().find_map(|e| match e {
            RuntimeEffect::SendEnvelope(env) | RuntimeEffect::SendEnvelopeTo { envelope: env, .. }
                if env.msg_type == *msg_type =>
            {
                Some(env)
            }
            _ => None,
        })
    }

    #[test]
    fn incoming_chat_delivers_and_acks() {
        let mut state = state(1);
        let sender = identity(2);

        let env = EnvelopeBuilder::new(
            sender.node_id(),
            state.local_id,
            MessageType::Chat,
            b"hello".to_vec(),
        )
        .sign(&sender);
        let effects = state.handle_incoming(&env.to_bytes().unwrap());

        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::DeliverMessage(m) if m.payload == b"hello")));
        let ack = find_sent(&effects, &MessageType::AckDelivery).expect("delivery ack");
        assert_eq!(ack.to, sender.node_id());
        assert!(ack.is_signed());
    }

    #[test]
    fn sealed_chat_is_opened_before_delivery() {
        let mut state = state(1);
        let sender = identity(2);

        let env = EnvelopeBuilder::new(
            sender.node_id(),
            state.local_id,
            MessageType::Chat,
            b"secret".to_vec(),
        )
        .seal_and_sign(&sender, &state.local_id.as_bytes())
        .unwrap();
        let effects = state.handle_incoming(&env.to_bytes().unwrap());

        let delivered = effects
            .iter()
            .find_map(|e| match e {
                RuntimeEffect::DeliverMessage(m) => Some(m),
                _ => None,
            })
            .expect("delivered");
        assert_eq!(delivered.payload, b"secret");
        assert!(delivered.was_sealed);
    }

    #[test]
    fn sealed_for_someone_else_drops_silently() {
        let mut state = state(1);
        let sender = identity(2);
        let other = identity(3);

        let env = EnvelopeBuilder::new(
            sender.node_id(),
            state.local_id,
            MessageType::Chat,
            b"secret".to_vec(),
        )
        .seal_and_sign(&sender, &other.node_id().as_bytes())
        .unwrap();
        let effects = state.handle_incoming(&env.to_bytes().unwrap());
        assert!(effects.is_empty());
    }

    #[test]
    fn heartbeat_updates_liveness_without_delivery() {
        let mut state = state(1);
        let sender = identity(2);
        let now = now_ms();
        state.topology.add_peer(peer_info(2, now.saturating_sub(10_000)));

        let env = EnvelopeBuilder::new(
            sender.node_id(),
            state.local_id,
            MessageType::Heartbeat,
            Vec::new(),
        )
        .sign(&sender);
        let effects = state.handle_incoming(&env.to_bytes().unwrap());

        assert!(effects.is_empty());
        assert_eq!(
            state.topology.status_of(&sender.node_id(), now_ms()),
            PeerStatus::Online
        );
    }

    #[test]
    fn send_message_via_relay_selects_and_tracks() {
        let mut state = state(1);
        let now = now_ms();
        let relay = node_id(3);
        let target = node_id(2);
        state.topology.add_peer(peer_info(2, now));
        state
            .topology
            .add_peer(peer_info(3, now).with_roles(vec![PeerRole::Relay]));

        let effects = state.handle_command(RuntimeCommand::SendMessage {
            to: target,
            payload: b"hi".to_vec(),
        });

        assert!(effects.iter().any(
            |e| matches!(e, RuntimeEffect::Emit(NodeEvent::RelaySelected { relay_id, .. }) if *relay_id == relay)
        ));
        let tracked = effects.iter().find_map(|e| match e {
            RuntimeEffect::SendTracked {
                target,
                envelope,
                direct,
            } => Some((target, envelope, direct)),
            _ => None,
        });
        let (send_target, envelope, direct) = tracked.expect("tracked send");
        assert_eq!(*send_target, relay);
        assert!(!direct);
        assert_eq!(envelope.to, target);
        assert!(envelope.sealed);
        assert_eq!(state.tracker.status(&envelope.id).unwrap(), crate::types::MessageStatus::Pending);
    }

    #[test]
    fn send_message_no_relay_no_peer_fails() {
        let mut state = state(1);
        let effects = state.handle_command(RuntimeCommand::SendMessage {
            to: node_id(2),
            payload: b"hi".to_vec(),
        });

        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::Emit(NodeEvent::RelayNone { .. }))));
        assert!(effects.iter().any(|e| matches!(
            e,
            RuntimeEffect::Emit(NodeEvent::MessageRejected { reason, .. }) if reason == "PEER_UNREACHABLE"
        )));
    }

    #[test]
    fn send_to_self_rejected() {
        let mut state = state(1);
        let local = state.local_id;
        let effects = state.handle_command(RuntimeCommand::SendMessage {
            to: local,
            payload: b"hi".to_vec(),
        });
        assert!(effects.iter().any(|e| matches!(
            e,
            RuntimeEffect::Emit(NodeEvent::MessageRejected { reason, .. }) if reason == "recipient-is-self"
        )));
    }

    #[test]
    fn relay_ack_advances_tracker_and_credits_relay() {
        let mut state = state(1);
        let relay = identity(3);
        let now = now_ms();
        state.tracker.track("msg-1", node_id(2), now);
        state.tracker.mark_sent("msg-1", now);

        let payload = crate::router::AckPayload {
            original_message_id: "msg-1".into(),
        }
        .to_bytes();
        let ack = EnvelopeBuilder::new(
            relay.node_id(),
            state.local_id,
            MessageType::AckRelay,
            payload,
        )
        .sign(&relay);

        let effects = state.handle_incoming(&ack.to_bytes().unwrap());
        assert!(effects.iter().any(|e| matches!(
            e,
            RuntimeEffect::StatusChange(c) if c.current == crate::types::MessageStatus::Relayed
        )));
        assert!(state.roles.metrics(&relay.node_id()).is_some());
    }

    #[test]
    fn forward_appends_hop_and_acks_origin() {
        let mut state = state(10);
        let origin = identity(1);
        let recipient = node_id(2);
        let now = now_ms();
        state.topology.add_peer(peer_info(2, now));

        let env = EnvelopeBuilder::new(origin.node_id(), recipient, MessageType::Chat, b"x".to_vec())
            .sign(&origin);
        let effects = state.handle_incoming(&env.to_bytes().unwrap());

        let forwarded = effects
            .iter()
            .find_map(|e| match e {
                RuntimeEffect::SendEnvelopeTo { target, envelope } if *target == recipient => {
                    Some(envelope)
                }
                _ => None,
            })
            .expect("forwarded envelope");
        assert_eq!(forwarded.via, vec![state.local_id]);
        assert_eq!(forwarded.hop_timestamps.len(), 1);

        let relay_ack = find_sent(&effects, &MessageType::AckRelay).expect("relay ack");
        assert_eq!(relay_ack.to, origin.node_id());
        assert!(relay_ack.is_signed());

        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::Emit(NodeEvent::MessageForwarded { .. }))));
    }

    #[test]
    fn forward_to_unknown_peer_rejected() {
        let mut state = state(10);
        let origin = identity(1);

        let env = EnvelopeBuilder::new(origin.node_id(), node_id(2), MessageType::Chat, b"x".to_vec())
            .sign(&origin);
        let effects = state.handle_incoming(&env.to_bytes().unwrap());

        assert!(effects.iter().any(|e| matches!(
            e,
            RuntimeEffect::Emit(NodeEvent::MessageRejected { reason, .. }) if reason == "PEER_UNREACHABLE"
        )));
    }

    #[test]
    fn read_receipt_is_one_shot() {
        let mut state = state(1);
        let sender = identity(2);

        let env = EnvelopeBuilder::new(
            sender.node_id(),
            state.local_id,
            MessageType::Chat,
            b"hello".to_vec(),
        )
        .sign(&sender);
        let msg_id = env.id.clone();
        state.handle_incoming(&env.to_bytes().unwrap());

        let (hop, receipt) = state.prepare_read_receipt(&msg_id).expect("first receipt");
        assert_eq!(receipt.to, sender.node_id());
        assert_eq!(receipt.msg_type, MessageType::ReadReceipt);
        assert_eq!(hop, sender.node_id()); // no relays known → direct
        state.read_receipt_sent(&msg_id);

        assert!(state.prepare_read_receipt(&msg_id).is_none());
        assert!(state.prepare_read_receipt("unknown-id").is_none());
    }

    #[test]
    fn add_peer_triggers_role_evaluation() {
        let mut state = state(1);
        let now = now_ms();
        let effects = state.handle_command(RuntimeCommand::AddPeer {
            info: peer_info(2, now),
        });

        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::Emit(NodeEvent::PeerConnected { .. }))));
        // Two non-offline peers (us and the new one), quota 1 → exactly
        // one relay, assigned deterministically.
        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::Emit(NodeEvent::RoleChanged { .. }))));
        let relay_count = state.topology.peers().filter(|p| p.is_relay()).count();
        assert_eq!(relay_count, 1);
    }

    #[test]
    fn local_role_change_broadcasts_role_assign() {
        let mut state = state(1);
        let now = now_ms();
        // Local node in topology plus one peer; local sorts first on
        // equal scores only if its id is smaller, so give it metrics.
        state.topology.add_peer(PeerInfo::new(state.local_id, "me", now));
        for i in 0..10 {
            state.roles.record_relay(state.local_id, now + i);
        }
        state.topology.add_peer(peer_info(2, now));

        let effects = state.handle_command(RuntimeCommand::EvaluateRoles);
        let role_assign = find_sent(&effects, &MessageType::RoleAssign);
        assert!(role_assign.is_some(), "local promotion should broadcast");
        let announce = RoleAnnounce::from_bytes(&role_assign.unwrap().payload).unwrap();
        assert!(announce.verify_signature());
        assert_eq!(announce.roles, vec![PeerRole::Relay]);
    }

    #[test]
    fn remote_role_assign_applies_to_peer_only() {
        let mut state = state(1);
        let peer = identity(2);
        let now = now_ms();
        state.topology.add_peer(peer_info(2, now));

        let announce = RoleAnnounce::new(&peer, vec![PeerRole::Relay], 0.9, now);
        let env = EnvelopeBuilder::new(
            peer.node_id(),
            state.local_id,
            MessageType::RoleAssign,
            announce.to_bytes(),
        )
        .sign(&peer);

        let effects = state.handle_incoming(&env.to_bytes().unwrap());
        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::Emit(NodeEvent::RoleChanged { node_id, .. }) if *node_id == peer.node_id())));
        assert!(state.topology.get(&peer.node_id()).unwrap().is_relay());
    }

    #[test]
    fn forged_role_assign_ignored() {
        let mut state = state(1);
        let peer = identity(2);
        let mallory = identity(3);
        let now = now_ms();
        state.topology.add_peer(peer_info(2, now));

        // Mallory claims peer 2 is a relay; signature is Mallory's.
        let mut announce = RoleAnnounce::new(&mallory, vec![PeerRole::Relay], 0.9, now);
        announce.node_id = peer.node_id();
        let env = EnvelopeBuilder::new(
            mallory.node_id(),
            state.local_id,
            MessageType::RoleAssign,
            announce.to_bytes(),
        )
        .sign(&mallory);

        let effects = state.handle_incoming(&env.to_bytes().unwrap());
        assert!(effects.is_empty());
        assert!(!state.topology.get(&peer.node_id()).unwrap().is_relay());
    }

    #[test]
    fn peer_announce_adds_peer() {
        let mut state = state(1);
        let peer = identity(2);
        let now = now_ms();

        let announce = PeerAnnounce::new(peer.node_id(), "alice", vec![PeerRole::Client], now);
        let env = EnvelopeBuilder::new(
            peer.node_id(),
            state.local_id,
            MessageType::PeerAnnounce,
            announce.to_bytes(),
        )
        .sign(&peer);

        let effects = state.handle_incoming(&env.to_bytes().unwrap());
        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::Emit(NodeEvent::PeerConnected { .. }))));
        assert_eq!(state.topology.get(&peer.node_id()).unwrap().username, "alice");
    }

    #[test]
    fn tick_tracker_cleanup_reports_removed() {
        let mut state = state(1);
        let now = now_ms();
        state.tracker.track("old", node_id(2), now.saturating_sub(100_000_000));
        state
            .tracker
            .mark_failed("old", now.saturating_sub(100_000_000));

        let effects = state.tick_tracker_cleanup();
        assert!(effects.iter().any(|e| matches!(
            e,
            RuntimeEffect::Emit(NodeEvent::CleanupCompleted { removed }) if *removed == 1
        )));
    }

    #[test]
    fn conn_closed_loses_direct_path() {
        let mut state = state(1);
        let peer = node_id(2);
        let now = now_ms();
        state.direct.note_message(peer, now);
        assert!(state.direct_attempt_due(peer));
        state.direct_connect_finished(peer, true);
        assert_eq!(state.direct.connection_type(&peer), ConnectionType::Direct);

        let effects = state.handle_conn_event(tom_transport::ConnEvent::Closed { peer });
        assert!(effects
            .iter()
            .any(|e| matches!(e, RuntimeEffect::Emit(NodeEvent::DirectPathLost { .. }))));
        assert_eq!(state.direct.connection_type(&peer), ConnectionType::Relay);
    }

    #[test]
    fn group_lifecycle_with_hub_failover() {
        let mut state = state(1);
        let now = now_ms();
        let hub = node_id(0xaa);
        state
            .topology
            .add_peer(peer_info(0xaa, now).with_roles(vec![PeerRole::Relay]));
        state
            .topology
            .add_peer(peer_info(0xbb, now).with_roles(vec![PeerRole::Relay]));

        let group_id = state
            .create_group("chat".into(), hub, &[node_id(2)])
            .unwrap();
        // Backup nominated from the other relay.
        assert_eq!(
            state.groups.get(&group_id).unwrap().backup_hub_id,
            Some(node_id(0xbb))
        );

        let effects = state.hub_unreachable(&group_id, now);
        assert!(effects.iter().any(|e| matches!(
            e,
            RuntimeEffect::Emit(NodeEvent::HubElected { new_hub_id, .. }) if *new_hub_id == node_id(0xbb)
        )));
    }
}
