use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::TomOverlayError;
use crate::identity::{self, Identity};
use crate::types::{now_ms, MessageType, NodeId};

/// How an envelope reached (or should reach) its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Direct,
    Relay,
}

/// The sole unit of inter-peer communication — a signed message container.
///
/// Serialized as MessagePack; identities travel as lowercase hex strings.
/// `payload` is opaque bytes: plaintext, a sealed container, or a
/// recognised sub-payload (ACKs, role announcements, group protocol).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique message identifier (UUID v4), unique per sender.
    pub id: String,
    /// Sender node identity.
    pub from: NodeId,
    /// Final recipient node identity. Never equal to `from`.
    pub to: NodeId,
    /// Relays already traversed, oldest first. Each forwarder appends
    /// itself exactly once.
    pub via: Vec<NodeId>,
    /// Message type — determines protocol handling.
    pub msg_type: MessageType,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Creation timestamp at the sender (Unix ms).
    pub timestamp: u64,
    /// Ed25519 signature over `signing_bytes()`. Empty if unsigned.
    pub signature: Vec<u8>,
    /// Sender's routing intent, if declared.
    pub route_type: Option<RouteType>,
    /// Per-hop arrival times, stamped by each forwarder.
    pub hop_timestamps: Vec<u64>,
    /// Whether `payload` is a sealed (E2E encrypted) container.
    pub sealed: bool,
}

impl Envelope {
    /// Create a new unsigned envelope.
    pub fn new(from: NodeId, to: NodeId, msg_type: MessageType, payload: Vec<u8>) -> Self {
        debug_assert_ne!(from, to, "envelope sender and recipient must differ");
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from,
            to,
            via: Vec::new(),
            msg_type,
            payload,
            timestamp: now_ms(),
            signature: Vec::new(),
            route_type: None,
            hop_timestamps: Vec::new(),
            sealed: false,
        }
    }

    /// Serialize to MessagePack wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TomOverlayError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack wire bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TomOverlayError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }

    /// Canonical signing preimage.
    ///
    /// Covers the fields fixed at creation. `via`, `hop_timestamps` and
    /// `route_type` are mutated by relays in transit and are excluded, so
    /// the signature stays valid at every hop.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let signable = SignableEnvelope {
            id: &self.id,
            from: &self.from,
            to: &self.to,
            msg_type: &self.msg_type,
            payload: &self.payload,
            timestamp: self.timestamp,
            sealed: self.sealed,
        };
        rmp_serde::to_vec(&signable).expect("signing_bytes serialization cannot fail")
    }

    /// Sign with the sender's identity.
    pub fn sign(&mut self, identity: &Identity) {
        self.signature = identity.sign(&self.signing_bytes()).to_vec();
    }

    /// Verify the signature against the sender (`self.from`).
    pub fn verify_signature(&self) -> Result<(), TomOverlayError> {
        if identity::verify(&self.from, &self.signing_bytes(), &self.signature) {
            Ok(())
        } else {
            Err(TomOverlayError::InvalidSignature)
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Seal the payload for the recipient. Sign afterwards — the
    /// signature covers the ciphertext so relays can authenticate without
    /// decrypting.
    pub fn seal_payload(&mut self, recipient_pk: &[u8; 32]) -> Result<(), TomOverlayError> {
        let sealed = crypto::seal(&self.payload, recipient_pk)?;
        self.payload = sealed.to_bytes()?;
        self.sealed = true;
        Ok(())
    }

    /// Open a sealed payload in place with the recipient's secret seed.
    pub fn open_payload(&mut self, recipient_seed: &[u8; 32]) -> Result<(), TomOverlayError> {
        if !self.sealed {
            return Err(TomOverlayError::InvalidEnvelope {
                reason: "payload is not sealed".into(),
            });
        }
        let sealed = crypto::SealedPayload::from_bytes(&self.payload)?;
        self.payload = crypto::open(&sealed, recipient_seed)?;
        self.sealed = false;
        Ok(())
    }
}

/// Fluent builder for signed (and optionally sealed) envelopes.
pub struct EnvelopeBuilder {
    from: NodeId,
    to: NodeId,
    via: Vec<NodeId>,
    msg_type: MessageType,
    payload: Vec<u8>,
    route_type: Option<RouteType>,
}

impl EnvelopeBuilder {
    pub fn new(from: NodeId, to: NodeId, msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            from,
            to,
            via: Vec::new(),
            msg_type,
            payload,
            route_type: None,
        }
    }

    /// Pre-populate the relay chain (used by ACKs travelling a reversed
    /// path; regular envelopes start with an empty chain).
    pub fn via(mut self, relays: Vec<NodeId>) -> Self {
        self.via = relays;
        self
    }

    pub fn route_type(mut self, route_type: RouteType) -> Self {
        self.route_type = Some(route_type);
        self
    }

    /// Build an unsigned envelope.
    pub fn build(self) -> Envelope {
        let mut env = Envelope::new(self.from, self.to, self.msg_type, self.payload);
        env.via = self.via;
        env.route_type = self.route_type;
        env
    }

    /// Build and sign.
    pub fn sign(self, identity: &Identity) -> Envelope {
        let mut env = self.build();
        env.sign(identity);
        env
    }

    /// Seal the payload for the recipient, then build and sign.
    pub fn seal_and_sign(
        self,
        identity: &Identity,
        recipient_pk: &[u8; 32],
    ) -> Result<Envelope, TomOverlayError> {
        let mut env = self.build();
        env.seal_payload(recipient_pk)?;
        env.sign(identity);
        Ok(env)
    }
}

/// Deterministic signing view — creation-time fields only.
#[derive(Serialize)]
struct SignableEnvelope<'a> {
    id: &'a str,
    from: &'a NodeId,
    to: &'a NodeId,
    msg_type: &'a MessageType,
    payload: &'a [u8],
    timestamp: u64,
    sealed: bool,
}
