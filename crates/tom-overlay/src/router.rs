/// Routing engine — decides what to do with every inbound envelope.
///
/// Pure decision logic: `route()` returns a `RoutingAction` for the
/// caller to execute. Exactly one of three outcomes per envelope:
/// deliver locally (with dedup), forward (appending self to `via` exactly
/// once), or reject. ACK and read-receipt subtypes are consumed here and
/// never surfaced as user messages.
///
/// Returned ACK envelopes are unsigned — the caller signs before sending.
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::TomOverlayError;
use crate::types::{MessageType, NodeId};

/// Maximum relay chain depth.
pub const MAX_RELAY_DEPTH: usize = 4;

/// Bound on the delivery dedup cache.
pub const DEDUP_CACHE_CAPACITY: usize = 1024;

/// Bound on the ACK anti-replay cache.
const ACK_CACHE_CAPACITY: usize = 1024;

/// Read receipts older than this are clamped (7 days).
const READ_RECEIPT_MAX_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

// ── Routing decisions ──────────────────────────────────────────────────

/// What to do with an inbound envelope.
#[derive(Debug)]
pub enum RoutingAction {
    /// A message for us — hand to the application. `response` is an
    /// unsigned `ack/delivery` for the sender, routed over the reversed
    /// relay chain.
    Deliver {
        envelope: Envelope,
        response: Envelope,
    },
    /// An ACK for one of our messages — update the tracker.
    AckReceived {
        original_message_id: String,
        kind: AckKind,
        from: NodeId,
    },
    /// A read receipt for one of our messages.
    ReadReceiptReceived {
        original_message_id: String,
        read_at: u64,
        from: NodeId,
    },
    /// Forward to the recipient. `relay_ack` is an unsigned `ack/relay`
    /// for the origin.
    Forward {
        envelope: Envelope,
        next_hop: NodeId,
        relay_ack: Envelope,
    },
    /// Rejected — surface via the rejection event, then drop.
    Reject { reason: String },
    /// Duplicate or replay — ignore silently.
    Drop,
}

// ── ACK payloads ───────────────────────────────────────────────────────

/// The two acknowledgement kinds the router consumes (read receipts are
/// their own type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// A forwarder confirms it passed the message on (`ack/relay`).
    Relay,
    /// The recipient confirms delivery (`ack/delivery`).
    Delivery,
}

/// Payload of an `ack/relay` or `ack/delivery` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub original_message_id: String,
}

impl AckPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("AckPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TomOverlayError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Payload of a `read-receipt` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptPayload {
    pub original_message_id: String,
    pub read_at: u64,
}

impl ReadReceiptPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("ReadReceiptPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TomOverlayError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

// ── Router ─────────────────────────────────────────────────────────────

pub struct Router {
    local_id: NodeId,
    /// Delivery dedup: "from:id" → seen. Bounded LRU; oldest evicted.
    dedup: LruCache<String, ()>,
    /// ACK / read-receipt anti-replay.
    ack_seen: LruCache<String, ()>,
}

impl Router {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            dedup: LruCache::new(NonZeroUsize::new(DEDUP_CACHE_CAPACITY).unwrap()),
            ack_seen: LruCache::new(NonZeroUsize::new(ACK_CACHE_CAPACITY).unwrap()),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Current sizes of (dedup, ack) caches.
    pub fn cache_sizes(&self) -> (usize, usize) {
        (self.dedup.len(), self.ack_seen.len())
    }

    /// Route an inbound envelope at time `now` (Unix ms).
    pub fn route(&mut self, envelope: Envelope, now: u64) -> RoutingAction {
        if envelope.from == envelope.to {
            return RoutingAction::Reject {
                reason: "sender equals recipient".into(),
            };
        }

        // Every envelope that passes the router carries a valid signature.
        if envelope.verify_signature().is_err() {
            return RoutingAction::Reject {
                reason: "invalid signature".into(),
            };
        }

        if envelope.via.len() > MAX_RELAY_DEPTH {
            return RoutingAction::Reject {
                reason: format!(
                    "relay chain depth {} exceeds max {}",
                    envelope.via.len(),
                    MAX_RELAY_DEPTH
                ),
            };
        }

        if envelope.to == self.local_id {
            self.handle_local(envelope, now)
        } else {
            self.handle_forward(envelope, now)
        }
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn handle_local(&mut self, envelope: Envelope, now: u64) -> RoutingAction {
        match envelope.msg_type {
            MessageType::AckRelay => self.handle_ack(envelope, AckKind::Relay),
            MessageType::AckDelivery => self.handle_ack(envelope, AckKind::Delivery),
            MessageType::ReadReceipt => self.handle_read_receipt(envelope, now),
            _ => self.handle_deliver(envelope),
        }
    }

    fn handle_deliver(&mut self, envelope: Envelope) -> RoutingAction {
        let cache_key = format!("{}:{}", envelope.from, envelope.id);
        if self.dedup.get(&cache_key).is_some() {
            return RoutingAction::Drop;
        }
        self.dedup.put(cache_key, ());

        let response = self.build_delivery_ack(&envelope);
        RoutingAction::Deliver { envelope, response }
    }

    fn handle_ack(&mut self, envelope: Envelope, kind: AckKind) -> RoutingAction {
        let ack = match AckPayload::from_bytes(&envelope.payload) {
            Ok(a) => a,
            Err(_) => {
                return RoutingAction::Reject {
                    reason: "malformed ACK payload".into(),
                }
            }
        };

        let cache_key = format!("{}:{}:{:?}", ack.original_message_id, envelope.from, kind);
        if self.ack_seen.get(&cache_key).is_some() {
            return RoutingAction::Drop;
        }
        self.ack_seen.put(cache_key, ());

        RoutingAction::AckReceived {
            original_message_id: ack.original_message_id,
            kind,
            from: envelope.from,
        }
    }

    fn handle_read_receipt(&mut self, envelope: Envelope, now: u64) -> RoutingAction {
        let rr = match ReadReceiptPayload::from_bytes(&envelope.payload) {
            Ok(r) => r,
            Err(_) => {
                return RoutingAction::Reject {
                    reason: "malformed read receipt payload".into(),
                }
            }
        };

        let cache_key = format!("{}:{}:read", rr.original_message_id, envelope.from);
        if self.ack_seen.get(&cache_key).is_some() {
            return RoutingAction::Drop;
        }
        self.ack_seen.put(cache_key, ());

        // Clamp read_at: not in the future, not older than 7 days.
        let read_at = rr
            .read_at
            .min(now)
            .max(now.saturating_sub(READ_RECEIPT_MAX_AGE_MS));

        RoutingAction::ReadReceiptReceived {
            original_message_id: rr.original_message_id,
            read_at,
            from: envelope.from,
        }
    }

    fn handle_forward(&mut self, mut envelope: Envelope, now: u64) -> RoutingAction {
        // Loop protection: each node forwards a given envelope once.
        if envelope.via.contains(&self.local_id) {
            return RoutingAction::Reject {
                reason: "relay loop: already forwarded here".into(),
            };
        }
        if envelope.via.len() >= MAX_RELAY_DEPTH {
            return RoutingAction::Reject {
                reason: format!("relay chain at max depth {MAX_RELAY_DEPTH}"),
            };
        }

        let relay_ack = self.build_relay_ack(&envelope);

        envelope.via.push(self.local_id);
        envelope.hop_timestamps.push(now);

        RoutingAction::Forward {
            next_hop: envelope.to,
            envelope,
            relay_ack,
        }
    }

    /// Unsigned `ack/delivery` for the sender. Starts with an empty
    /// trail; the caller hands it to the adjacent relay (the last hop of
    /// the original), which routes it back.
    fn build_delivery_ack(&self, original: &Envelope) -> Envelope {
        let payload = AckPayload {
            original_message_id: original.id.clone(),
        }
        .to_bytes();
        Envelope::new(self.local_id, original.from, MessageType::AckDelivery, payload)
    }

    /// Unsigned `ack/relay` sent straight back to the origin.
    fn build_relay_ack(&self, original: &Envelope) -> Envelope {
        let payload = AckPayload {
            original_message_id: original.id.clone(),
        }
        .to_bytes();
        Envelope::new(self.local_id, original.from, MessageType::AckRelay, payload)
    }
}
