//! Centralized cryptographic operations for pearsync.
//!
//! **All** Ed25519 signing/verification and hashing go through this
//! module, one audit surface for cryptographic correctness.
//!
//! # Primitives
//!
//! | Primitive | Algorithm       | Purpose                                  |
//! |-----------|-----------------|------------------------------------------|
//! | Hash      | BLAKE3 (32 B)   | Block chain linkage, topic derivation    |
//! | Hash      | SHA-256 (32 B)  | File content digests in the manifest     |
//! | Signature | Ed25519 (64 B)  | Block signing                            |
//! | Identity  | Ed25519 keypair | Writer identity, bound to QUIC endpoint  |

use crate::types::{Hash, PubKey, Signature};
use sha2::{Digest, Sha256};

/// Compute the BLAKE3 hash of arbitrary bytes.
///
/// Used for: log record integrity, block chain hashes, gossip topic
/// derivation, log discovery tokens.
#[inline]
pub fn content_hash(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

/// Compute the SHA-256 digest of file content.
///
/// Manifest entries carry this digest so peers can compare file state
/// without shipping content.
pub fn file_digest(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// The byte string a block signature covers: `prev_hash || seq_be || payload`.
pub fn block_sign_input(prev_hash: &Hash, seq: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 8 + payload.len());
    buf.extend_from_slice(prev_hash.as_bytes());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// The chain hash of a block: BLAKE3 over the sign input plus the signature.
///
/// This is what the *next* block's signature covers as `prev_hash`, so a
/// block cannot be re-signed without breaking every successor.
pub fn block_hash(prev_hash: &Hash, seq: u64, payload: &[u8], signature: &Signature) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(&seq.to_be_bytes());
    hasher.update(payload);
    hasher.update(signature.as_bytes());
    Hash(*hasher.finalize().as_bytes())
}

/// Sign a block position with an Ed25519 signing key.
pub fn sign_block(
    signing_key: &ed25519_dalek::SigningKey,
    prev_hash: &Hash,
    seq: u64,
    payload: &[u8],
) -> Signature {
    use ed25519_dalek::Signer;
    let sig = signing_key.sign(&block_sign_input(prev_hash, seq, payload));
    Signature(sig.to_bytes())
}

/// Verify a block signature against the author's public key.
///
/// Uses `verify_strict()` (rejects small-order keys, checks canonical S).
pub fn verify_block(
    author: &PubKey,
    prev_hash: &Hash,
    seq: u64,
    payload: &[u8],
    signature: &Signature,
) -> Result<(), CryptoError> {
    let vk = verifying_key(author)?;
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    vk.verify_strict(&block_sign_input(prev_hash, seq, payload), &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Deserialize a `PubKey` into an Ed25519 `VerifyingKey`.
///
/// Fails if the 32 bytes are not a valid curve point.
pub fn verifying_key(pubkey: &PubKey) -> Result<ed25519_dalek::VerifyingKey, CryptoError> {
    ed25519_dalek::VerifyingKey::from_bytes(&pubkey.0).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Generate 32 bytes of cryptographically secure randomness.
pub fn generate_secret() -> [u8; 32] {
    use rand::RngCore;
    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    secret
}

/// Cryptographic operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid Ed25519 signature")]
    InvalidSignature,

    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,
}
