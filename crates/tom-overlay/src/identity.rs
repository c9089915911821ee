//! Node identity — Ed25519 keypair and its persistence contract.
//!
//! The `NodeId` is the public key; signing and verification operate on
//! raw byte slices so envelopes and announcements share one code path.
//! Persistence is an external collaborator behind `IdentityStore`; the
//! stored form is `{public: 32B, secret: 64B = seed || public}` with an
//! exact hex round-trip for every byte value.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::error::TomOverlayError;
use crate::types::NodeId;

/// A node's long-lived signing identity.
#[derive(Clone)]
pub struct Identity {
    signing: SigningKey,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Rebuild an identity from its 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// The node's network identity (public key).
    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(self.signing.verifying_key().to_bytes())
    }

    /// The 32-byte secret seed.
    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Sign arbitrary bytes, producing a 64-byte detached signature.
    pub fn sign(&self, bytes: &[u8]) -> [u8; 64] {
        self.signing.sign(bytes).to_bytes()
    }

    /// The persistable form of this identity.
    pub fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            public_key: self.signing.verifying_key().to_bytes(),
            secret_key: self.signing.to_keypair_bytes(),
        }
    }

    /// Rebuild from a stored identity, checking internal consistency.
    pub fn from_stored(stored: &StoredIdentity) -> Result<Self, TomOverlayError> {
        let seed: [u8; 32] = stored.secret_key[..32]
            .try_into()
            .map_err(|_| TomOverlayError::Crypto("wrong-length secret key".into()))?;
        let identity = Self::from_seed(&seed);
        let derived = identity.to_stored();
        if derived.public_key != stored.public_key || derived.secret_key != stored.secret_key {
            return Err(TomOverlayError::Crypto(
                "stored identity is inconsistent with its seed".into(),
            ));
        }
        Ok(identity)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({:?})", self.node_id())
    }
}

/// Verify a detached signature under a node's public key.
///
/// Strict verification — non-canonical signatures are rejected.
pub fn verify(node_id: &NodeId, bytes: &[u8], signature: &[u8]) -> bool {
    if signature.len() != 64 {
        return false;
    }
    let Ok(verifying) = VerifyingKey::from_bytes(&node_id.as_bytes()) else {
        return false;
    };
    let sig_bytes: [u8; 64] = signature.try_into().expect("length checked above");
    verifying
        .verify_strict(bytes, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

// ── Persistence collaborator ───────────────────────────────────────────

/// Serialized identity: `{public: 32B, secret: 64B}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    pub public_key: [u8; 32],
    pub secret_key: [u8; 64],
}

impl StoredIdentity {
    /// Hex form `(public, secret)`, lowercase.
    pub fn to_hex(&self) -> (String, String) {
        (hex::encode(self.public_key), hex::encode(self.secret_key))
    }

    /// Rebuild from hex strings. The round-trip is exact for every byte,
    /// including 0x00.
    pub fn from_hex(public: &str, secret: &str) -> Result<Self, TomOverlayError> {
        let public_key: [u8; 32] = hex::decode(public)
            .map_err(|e| TomOverlayError::Crypto(format!("bad public key hex: {e}")))?
            .try_into()
            .map_err(|_| TomOverlayError::Crypto("wrong-length public key".into()))?;
        let secret_key: [u8; 64] = hex::decode(secret)
            .map_err(|e| TomOverlayError::Crypto(format!("bad secret key hex: {e}")))?
            .try_into()
            .map_err(|_| TomOverlayError::Crypto("wrong-length secret key".into()))?;
        Ok(Self {
            public_key,
            secret_key,
        })
    }
}

/// Identity persistence collaborator (disk, keychain, ...).
pub trait IdentityStore {
    fn save(&self, identity: &StoredIdentity) -> Result<(), TomOverlayError>;
    fn load(&self) -> Result<Option<StoredIdentity>, TomOverlayError>;
}
