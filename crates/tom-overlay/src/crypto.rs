//! End-to-end payload sealing.
//!
//! Ephemeral X25519 Diffie-Hellman per message (forward secrecy) +
//! XChaCha20-Poly1305 AEAD. Recipient keys are Ed25519 node identities,
//! converted to X25519 via the standard Edwards→Montgomery map.
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::error::TomOverlayError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"tom-overlay-e2e-xchacha20poly1305-v1";

/// Sealed payload container, carried verbatim inside `Envelope.payload`.
///
/// Holds everything the recipient needs: ciphertext, nonce, and the
/// sender's ephemeral X25519 public key for DH recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// XChaCha20-Poly1305 ciphertext (includes the 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    /// 24-byte extended nonce — safe to generate randomly.
    pub nonce: [u8; 24],
    /// Sender's ephemeral X25519 public key.
    pub ephemeral_pk: [u8; 32],
}

impl SealedPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TomOverlayError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TomOverlayError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Convert an Ed25519 public key to X25519 (Edwards → Montgomery).
pub fn ed25519_to_x25519_public(ed25519_pk: &[u8; 32]) -> Result<[u8; 32], TomOverlayError> {
    let compressed = CompressedEdwardsY(*ed25519_pk);
    let edwards = compressed.decompress().ok_or_else(|| {
        TomOverlayError::Crypto("invalid Ed25519 public key: decompression failed".into())
    })?;
    Ok(edwards.to_montgomery().to_bytes())
}

/// Convert an Ed25519 secret seed to an X25519 secret.
///
/// SHA-512(seed), first 32 bytes, clamped — the libsodium construction.
pub fn ed25519_to_x25519_secret(ed25519_seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(ed25519_seed);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&hash[..32]);
    secret[0] &= 248;
    secret[31] &= 127;
    secret[31] |= 64;
    secret
}

/// Derive the AEAD key from a DH shared secret via HKDF-SHA256.
fn derive_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
    key
}

/// Seal plaintext for a recipient identified by their Ed25519 public key.
///
/// A fresh ephemeral X25519 keypair is generated per call; losing the
/// sender's long-lived key never exposes past messages.
pub fn seal(plaintext: &[u8], recipient_ed25519_pk: &[u8; 32]) -> Result<SealedPayload, TomOverlayError> {
    use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

    let recipient_x25519 = X25519PublicKey::from(ed25519_to_x25519_public(recipient_ed25519_pk)?);

    let ephemeral_secret = X25519Secret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let shared_secret = ephemeral_secret.diffie_hellman(&recipient_x25519);
    let key = derive_key(shared_secret.as_bytes());
    let cipher = XChaCha20Poly1305::new(&key.into());

    let mut nonce_bytes = [0u8; 24];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| TomOverlayError::Crypto(format!("encryption failed: {e}")))?;

    Ok(SealedPayload {
        ciphertext,
        nonce: nonce_bytes,
        ephemeral_pk: ephemeral_public.to_bytes(),
    })
}

/// Open a sealed payload with the recipient's Ed25519 secret seed.
///
/// Any tamper in ciphertext, nonce or ephemeral key fails authentication.
pub fn open(payload: &SealedPayload, recipient_ed25519_seed: &[u8; 32]) -> Result<Vec<u8>, TomOverlayError> {
    let x25519_secret = X25519Secret::from(ed25519_to_x25519_secret(recipient_ed25519_seed));
    let ephemeral_pk = X25519PublicKey::from(payload.ephemeral_pk);

    let shared_secret = x25519_secret.diffie_hellman(&ephemeral_pk);
    let key = derive_key(shared_secret.as_bytes());
    let cipher = XChaCha20Poly1305::new(&key.into());

    let nonce = XNonce::from(payload.nonce);
    cipher
        .decrypt(&nonce, payload.ciphertext.as_ref())
        .map_err(|_| TomOverlayError::Crypto("decryption failed: authentication error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    /// Deterministic Ed25519 keypair (seed, public) from a seed byte.
    fn keypair(seed_byte: u8) -> ([u8; 32], [u8; 32]) {
        let identity = Identity::from_seed(&[seed_byte; 32]);
        (identity.seed(), identity.node_id().as_bytes())
    }

    #[test]
    fn seal_open_roundtrip() {
        let (sk, pk) = keypair(42);
        let sealed = seal(b"Hello, ToM overlay!", &pk).unwrap();
        let opened = open(&sealed, &sk).unwrap();
        assert_eq!(opened, b"Hello, ToM overlay!");
    }

    #[test]
    fn empty_and_large_payloads() {
        let (sk, pk) = keypair(1);
        let opened = open(&seal(b"", &pk).unwrap(), &sk).unwrap();
        assert_eq!(opened, b"");

        // 100 KB must round-trip.
        let plaintext = vec![0xAB; 100_000];
        let opened = open(&seal(&plaintext, &pk).unwrap(), &sk).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let (_sk1, pk1) = keypair(1);
        let (sk2, _pk2) = keypair(2);
        let sealed = seal(b"secret", &pk1).unwrap();
        assert!(open(&sealed, &sk2).is_err());
    }

    #[test]
    fn single_byte_tamper_fails() {
        let (sk, pk) = keypair(3);

        let mut tampered = seal(b"secret", &pk).unwrap();
        tampered.ciphertext[0] ^= 0x01;
        assert!(open(&tampered, &sk).is_err());

        let mut tampered = seal(b"secret", &pk).unwrap();
        tampered.nonce[0] ^= 0x01;
        assert!(open(&tampered, &sk).is_err());

        let mut tampered = seal(b"secret", &pk).unwrap();
        tampered.ephemeral_pk[0] ^= 0x01;
        assert!(open(&tampered, &sk).is_err());
    }

    #[test]
    fn fresh_ephemeral_key_per_message() {
        let (_sk, pk) = keypair(6);
        let a = seal(b"same message", &pk).unwrap();
        let b = seal(b"same message", &pk).unwrap();
        assert_ne!(a.ephemeral_pk, b.ephemeral_pk);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn key_conversions_deterministic() {
        let (sk, pk) = keypair(8);
        assert_eq!(
            ed25519_to_x25519_public(&pk).unwrap(),
            ed25519_to_x25519_public(&pk).unwrap()
        );
        assert_eq!(ed25519_to_x25519_secret(&sk), ed25519_to_x25519_secret(&sk));
    }

    #[test]
    fn x25519_secret_is_clamped() {
        let secret = ed25519_to_x25519_secret(&[0xFF; 32]);
        assert_eq!(secret[0] & 7, 0);
        assert_eq!(secret[31] & 128, 0);
        assert_eq!(secret[31] & 64, 64);
    }

    #[test]
    fn sealed_payload_wire_roundtrip() {
        let (_sk, pk) = keypair(9);
        let sealed = seal(b"roundtrip", &pk).unwrap();
        let decoded = SealedPayload::from_bytes(&sealed.to_bytes().unwrap()).unwrap();
        assert_eq!(sealed, decoded);
    }

    #[test]
    fn ciphertext_overhead_is_auth_tag() {
        let (_sk, pk) = keypair(10);
        let sealed = seal(b"test payload", &pk).unwrap();
        assert_eq!(sealed.ciphertext.len(), b"test payload".len() + 16);
    }
}
