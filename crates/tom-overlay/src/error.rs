/// Overlay-level errors for ToM.
///
/// Wraps transport errors and adds protocol-specific variants (crypto,
/// routing, serialization). `wire_code()` maps every variant onto the flat
/// error taxonomy exchanged between nodes.
#[derive(Debug, thiserror::Error)]
pub enum TomOverlayError {
    #[error("transport error: {0}")]
    Transport(#[from] tom_transport::TomTransportError),

    #[error("invalid envelope: {reason}")]
    InvalidEnvelope { reason: String },

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("peer unreachable: {node_id}")]
    PeerUnreachable { node_id: String },

    #[error("relay unreachable: {node_id}")]
    RelayUnreachable { node_id: String },

    #[error("relay rejected message: {reason}")]
    RelayRejected { reason: String },

    #[error("signaling timed out")]
    SignalingTimeout,

    #[error("identity missing")]
    IdentityMissing,

    #[error("group limit reached ({0} max)")]
    GroupLimitReached(usize),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl TomOverlayError {
    /// The flat wire-level error code for this error.
    pub fn wire_code(&self) -> &'static str {
        match self {
            TomOverlayError::Transport(_) => "TRANSPORT_FAILED",
            TomOverlayError::InvalidEnvelope { .. }
            | TomOverlayError::InvalidSignature
            | TomOverlayError::Serialization(_)
            | TomOverlayError::Deserialization(_) => "INVALID_ENVELOPE",
            TomOverlayError::Crypto(_) => "CRYPTO_FAILED",
            TomOverlayError::PeerUnreachable { .. } => "PEER_UNREACHABLE",
            TomOverlayError::RelayUnreachable { .. } => "RELAY_UNREACHABLE",
            TomOverlayError::RelayRejected { .. } | TomOverlayError::GroupLimitReached(_) => {
                "RELAY_REJECTED"
            }
            TomOverlayError::SignalingTimeout => "SIGNALING_TIMEOUT",
            TomOverlayError::IdentityMissing => "IDENTITY_MISSING",
        }
    }
}

impl From<rmp_serde::encode::Error> for TomOverlayError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TomOverlayError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TomOverlayError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TomOverlayError::Deserialization(e.to_string())
    }
}
