//! Effect executor — the only place that touches I/O.
//!
//! Plain effects (sends, deliveries, events) are executed here. The
//! effects that need the state or the retry set (`SendTracked`,
//! `ScheduleDirectAttempt`, `Disconnect`) are handled by the loop.

use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::tracker::StatusChange;
use crate::types::NodeId;

use super::effect::RuntimeEffect;
use super::transport::Transport;
use super::{DeliveredMessage, NodeEvent};

/// Execute one plain effect.
pub(super) async fn execute_one<T: Transport>(
    effect: RuntimeEffect,
    transport: &T,
    msg_tx: &mpsc::Sender<DeliveredMessage>,
    status_tx: &mpsc::Sender<StatusChange>,
    event_tx: &mpsc::Sender<NodeEvent>,
) {
    match effect {
        RuntimeEffect::SendEnvelope(envelope) => {
            let target = envelope.via.first().copied().unwrap_or(envelope.to);
            send_envelope_to(transport, target, &envelope, event_tx).await;
        }
        RuntimeEffect::SendEnvelopeTo { target, envelope } => {
            send_envelope_to(transport, target, &envelope, event_tx).await;
        }
        RuntimeEffect::DeliverMessage(msg) => {
            // try_send: never block the runtime; the consumer is
            // responsible for draining fast enough.
            let _ = msg_tx.try_send(msg);
        }
        RuntimeEffect::StatusChange(change) => {
            let _ = status_tx.try_send(change);
        }
        RuntimeEffect::Emit(event) => {
            let _ = event_tx.try_send(event);
        }
        other => {
            debug_assert!(false, "loop-level effect reached executor: {other:?}");
            tracing::warn!(?other, "unexecutable effect dropped");
        }
    }
}

/// Best-effort envelope send; failures surface as an error event.
async fn send_envelope_to<T: Transport>(
    transport: &T,
    target: NodeId,
    envelope: &Envelope,
    event_tx: &mpsc::Sender<NodeEvent>,
) {
    match envelope.to_bytes() {
        Ok(bytes) => {
            if let Err(e) = transport.send_raw(target, &bytes).await {
                let _ = event_tx.try_send(NodeEvent::Error {
                    description: format!("send to {target} failed: {e}"),
                });
            }
        }
        Err(e) => {
            let _ = event_tx.try_send(NodeEvent::Error {
                description: format!("serialize envelope failed: {e}"),
            });
        }
    }
}
