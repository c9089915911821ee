/// The runtime event loop — thin orchestrator.
///
/// Multiplexes transport frames, application commands, connection
/// events and timers; all protocol logic lives in `RuntimeState`.
/// Reconnect backoffs run in a `JoinSet` so shutdown cancels them all.
use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tom_transport::MemoryNode;

use crate::tracker::StatusChange;
use crate::types::NodeId;

use super::effect::RuntimeEffect;
use super::executor;
use super::state::RuntimeState;
use super::transport::Transport;
use super::{DeliveredMessage, NodeEvent, RuntimeCommand};

pub(super) async fn runtime_loop(
    mut node: MemoryNode,
    mut state: RuntimeState,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    msg_tx: mpsc::Sender<DeliveredMessage>,
    status_tx: mpsc::Sender<StatusChange>,
    event_tx: mpsc::Sender<NodeEvent>,
) {
    let mut conn_rx = node.conn_events();

    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval);
    let mut role_eval = tokio::time::interval(state.config.role_eval_interval);
    let mut tracker_cleanup = tokio::time::interval(state.config.tracker_cleanup_interval);
    // Skip the immediate first tick.
    heartbeat.tick().await;
    role_eval.tick().await;
    tracker_cleanup.tick().await;

    // Pending direct-path backoffs; aborted wholesale on shutdown.
    let mut direct_retries: JoinSet<NodeId> = JoinSet::new();

    let _ = event_tx.try_send(NodeEvent::IdentityReady {
        node_id: state.local_id,
    });
    let _ = event_tx.try_send(NodeEvent::Connected);

    loop {
        let effects = tokio::select! {
            // ── 1. Inbound frames ───────────────────────────────
            result = node.recv_raw() => match result {
                Ok((_from, data)) => state.handle_incoming(&data),
                Err(_) => break,
            },

            // ── 2. Application commands ─────────────────────────
            Some(cmd) = cmd_rx.recv() => match cmd {
                RuntimeCommand::Shutdown => break,
                RuntimeCommand::GetPeers { reply } => {
                    let _ = reply.send(state.peers_snapshot());
                    Vec::new()
                }
                RuntimeCommand::GetMessageStatus { message_id, reply } => {
                    let _ = reply.send(state.tracker.status(&message_id));
                    Vec::new()
                }
                RuntimeCommand::GetConnectionType { peer, reply } => {
                    let _ = reply.send(state.direct.connection_type(&peer));
                    Vec::new()
                }
                RuntimeCommand::CreateGroup { name, hub_id, members, reply } => {
                    let _ = reply.send(state.create_group(name, hub_id, &members));
                    Vec::new()
                }
                RuntimeCommand::MarkRead { message_id, reply } => {
                    mark_read(&mut state, &node, message_id, reply).await
                }
                RuntimeCommand::AttemptDirectPath { peer } => {
                    attempt_direct(&mut state, &node, peer)
                }
                other => state.handle_command(other),
            },

            // ── 3. Connection lifecycle ─────────────────────────
            Ok(event) = conn_rx.recv() => state.handle_conn_event(event),

            // ── 4. Timers ───────────────────────────────────────
            _ = heartbeat.tick() => state.tick_heartbeat(),
            _ = role_eval.tick() => state.tick_roles(),
            _ = tracker_cleanup.tick() => state.tick_tracker_cleanup(),

            // ── 5. Due direct-path reconnects ───────────────────
            Some(joined) = direct_retries.join_next(), if !direct_retries.is_empty() => {
                match joined {
                    Ok(peer) => attempt_direct(&mut state, &node, peer),
                    Err(_) => Vec::new(), // aborted
                }
            }
        };

        process_effects(
            effects,
            &mut state,
            &mut direct_retries,
            &node,
            &msg_tx,
            &status_tx,
            &event_tx,
        )
        .await;
    }

    // Shutdown: cancel pending backoffs, close every peer channel.
    direct_retries.abort_all();
    node.shutdown();
}

/// Run an upgrade attempt now (the backoff already elapsed, or the
/// operator asked directly).
fn attempt_direct(state: &mut RuntimeState, node: &MemoryNode, peer: NodeId) -> Vec<RuntimeEffect> {
    if !state.direct_attempt_due(peer) {
        return Vec::new();
    }
    let ok = Transport::connect(node, peer).is_ok();
    state.direct_connect_finished(peer, ok)
}

/// One-shot read receipt: the reply is `true` only when this call
/// actually put a receipt on the wire.
async fn mark_read(
    state: &mut RuntimeState,
    node: &MemoryNode,
    message_id: String,
    reply: oneshot::Sender<bool>,
) -> Vec<RuntimeEffect> {
    let Some((target, envelope)) = state.prepare_read_receipt(&message_id) else {
        let _ = reply.send(false);
        return Vec::new();
    };
    let sent = match envelope.to_bytes() {
        Ok(bytes) => node.send_raw(target, &bytes).await.is_ok(),
        Err(_) => false,
    };
    if sent {
        let _ = reply.send(true);
        state.read_receipt_sent(&message_id)
    } else {
        let _ = reply.send(false);
        vec![RuntimeEffect::Emit(NodeEvent::ReadReceiptFailed { message_id })]
    }
}

/// Execute effects in order. Loop-level effects (tracked sends, backoff
/// scheduling, disconnects) are handled here; the rest go through the
/// executor.
async fn process_effects(
    effects: Vec<RuntimeEffect>,
    state: &mut RuntimeState,
    direct_retries: &mut JoinSet<NodeId>,
    node: &MemoryNode,
    msg_tx: &mpsc::Sender<DeliveredMessage>,
    status_tx: &mpsc::Sender<StatusChange>,
    event_tx: &mpsc::Sender<NodeEvent>,
) {
    let mut queue: VecDeque<RuntimeEffect> = effects.into();
    while let Some(effect) = queue.pop_front() {
        match effect {
            RuntimeEffect::SendTracked {
                target,
                envelope,
                direct,
            } => {
                let message_id = envelope.id.clone();
                let to = envelope.to;
                let sent = match envelope.to_bytes() {
                    Ok(bytes) => node.send_raw(target, &bytes).await.is_ok(),
                    Err(_) => false,
                };
                let follow_up = if sent {
                    state.on_send_ok(&message_id, to, direct)
                } else {
                    state.on_send_failed(&message_id, to, target)
                };
                for f in follow_up.into_iter().rev() {
                    queue.push_front(f);
                }
            }
            RuntimeEffect::ScheduleDirectAttempt { peer, delay_ms } => {
                direct_retries.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    peer
                });
            }
            RuntimeEffect::Disconnect { peer } => Transport::disconnect(node, peer),
            other => executor::execute_one(other, node, msg_tx, status_tx, event_tx).await,
        }
    }
}
