use crate::envelope::Envelope;
use crate::tracker::StatusChange;
use crate::types::NodeId;

use super::{DeliveredMessage, NodeEvent};

/// Intention produced by the pure logic in `RuntimeState`.
///
/// Every `handle_*` / `tick_*` method returns `Vec<RuntimeEffect>`; the
/// event loop executes them against the transport and the app channels.
/// No state method ever touches I/O.
#[derive(Debug)]
pub enum RuntimeEffect {
    /// Send an envelope to its first hop (`via[0]` if pre-routed, else
    /// the recipient).
    SendEnvelope(Envelope),

    /// Send an envelope to an explicit next hop.
    SendEnvelopeTo { target: NodeId, envelope: Envelope },

    /// Send a tracked outbound message. The loop reports the transport
    /// outcome back into the state so the tracker advances or fails.
    SendTracked {
        target: NodeId,
        envelope: Envelope,
        direct: bool,
    },

    /// Hand a delivered message to the application.
    DeliverMessage(DeliveredMessage),

    /// Notify a tracker transition.
    StatusChange(StatusChange),

    /// Emit an operator-visible event.
    Emit(NodeEvent),

    /// Schedule a direct-path connect attempt after `delay_ms`.
    ScheduleDirectAttempt { peer: NodeId, delay_ms: u64 },

    /// Close the transport channel to a peer.
    Disconnect { peer: NodeId },
}
