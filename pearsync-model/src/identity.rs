//! Writer identity and key storage
//!
//! Each node holds an Ed25519 keypair per workspace:
//! - Private key: stored locally in `identity.key` (never replicated)
//! - Public key: the writer's identity; for the workspace creator it is
//!   also the workspace key itself

use crate::types::PubKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

/// Errors from identity load/store operations
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid signature")]
    InvalidSignature,
}

/// A writer in a pearsync workspace.
///
/// The keypair signs log blocks and authenticates the QUIC endpoint.
#[derive(Clone)]
pub struct WriterIdentity {
    signing_key: SigningKey,
}

impl WriterIdentity {
    /// Generate a new identity with a random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create an identity from an existing signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Load the identity from a key file, or generate and save one.
    /// Returns `(identity, is_new)`.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<(Self, bool), IdentityError> {
        let path = path.as_ref();
        if path.exists() {
            Ok((Self::load(path)?, false))
        } else {
            let identity = Self::generate();
            identity.save(path)?;
            Ok((identity, true))
        }
    }

    /// Load an identity from a 32-byte seed file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        use zeroize::Zeroizing;

        let bytes = Zeroizing::new(fs::read(path)?);
        if bytes.len() != 32 {
            return Err(IdentityError::InvalidKeyLength(bytes.len()));
        }

        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&bytes);

        let signing_key = SigningKey::from_bytes(&key_bytes);
        Ok(Self { signing_key })
    }

    /// Save the private key seed to a file (owner read/write only).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IdentityError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(self.signing_key.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// The writer's public key as a strong type.
    pub fn public_key(&self) -> PubKey {
        PubKey::from(self.signing_key.verifying_key().to_bytes())
    }

    /// The dalek verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The signing key, for block signing and iroh endpoint binding.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Sign a raw message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Verify a signature against this identity's public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), IdentityError> {
        self.verifying_key()
            .verify(message, signature)
            .map_err(|_| IdentityError::InvalidSignature)
    }
}

impl std::fmt::Debug for WriterIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WriterIdentity({})", self.public_key().fmt_short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_distinct_keys() {
        let a = WriterIdentity::generate();
        let b = WriterIdentity::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("identity.key");

        let original = WriterIdentity::generate();
        original.save(&path).unwrap();

        let loaded = WriterIdentity::load(&path).unwrap();
        assert_eq!(loaded.public_key(), original.public_key());
    }

    #[test]
    fn load_or_generate_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("identity.key");

        let (first, is_new) = WriterIdentity::load_or_generate(&path).unwrap();
        assert!(is_new);
        let (second, is_new) = WriterIdentity::load_or_generate(&path).unwrap();
        assert!(!is_new);
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn load_rejects_short_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("identity.key");
        fs::write(&path, [0u8; 7]).unwrap();

        assert!(matches!(
            WriterIdentity::load(&path),
            Err(IdentityError::InvalidKeyLength(7))
        ));
    }
}
