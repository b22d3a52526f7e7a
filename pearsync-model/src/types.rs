//! Strong types for fixed-size byte arrays
//!
//! Semantic newtypes replacing raw `[u8; N]`: a 32-byte workspace/writer
//! key, a 32-byte hash, a 64-byte Ed25519 signature.

use std::fmt;
use thiserror::Error;

/// Error parsing a key or hash from user-supplied hex.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("expected {expected} hex characters, got {got}")]
    Length { expected: usize, got: usize },
}

macro_rules! define_bytes {
    ($name:ident, $len:expr, $doc:expr, [$($derives:ident),*]) => {
        #[doc = $doc]
        #[derive(Clone, Copy, serde::Serialize, serde::Deserialize, $($derives),*)]
        #[repr(transparent)]
        pub struct $name(#[serde(with = "serde_bytes")] pub [u8; $len]);

        impl $name {
            /// Returns the inner bytes as a fixed-size array reference.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Parse from a lowercase hex string of exactly `2 * $len` characters.
            pub fn from_hex(hex_str: &str) -> Result<Self, KeyParseError> {
                if hex_str.len() != $len * 2 {
                    return Err(KeyParseError::Length {
                        expected: $len * 2,
                        got: hex_str.len(),
                    });
                }
                let bytes = hex::decode(hex_str)
                    .map_err(|e| KeyParseError::Hex(e.to_string()))?;
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| KeyParseError::Length {
                        expected: $len * 2,
                        got: hex_str.len(),
                    })?;
                Ok(Self(arr))
            }

            /// First eight hex characters, for log lines.
            pub fn fmt_short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for [u8; $len] {
            fn from(wrapper: $name) -> [u8; $len] {
                wrapper.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = [u8; $len];
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;
            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                Ok(Self(<[u8; $len]>::try_from(slice)?))
            }
        }

        impl TryFrom<Vec<u8>> for $name {
            type Error = Vec<u8>;
            fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
                if vec.len() != $len {
                    return Err(vec);
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&vec);
                Ok(Self(arr))
            }
        }
    };
}

define_bytes!(
    Hash,
    32,
    "32-byte hash (BLAKE3 for chain linkage, SHA-256 for file content)",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);
}

define_bytes!(
    PubKey,
    32,
    "32-byte Ed25519 public key; doubles as workspace and writer identity",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

define_bytes!(
    Signature,
    64,
    "64-byte Ed25519 signature",
    [PartialEq, Eq]
);

impl Signature {
    pub const ZERO: Signature = Signature([0u8; 64]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_displays_as_lowercase_hex() {
        let hash = Hash([0xab; 32]);
        let expected = "ab".repeat(32);
        assert_eq!(format!("{}", hash), expected);
        assert_eq!(format!("{:?}", hash), format!("Hash({})", expected));
    }

    #[test]
    fn from_hex_round_trips() {
        let key = PubKey([0x5c; 32]);
        let parsed = PubKey::from_hex(&key.to_string()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = PubKey::from_hex("abcd").unwrap_err();
        assert!(matches!(err, KeyParseError::Length { expected: 64, got: 4 }));
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let bad = "zz".repeat(32);
        assert!(matches!(PubKey::from_hex(&bad), Err(KeyParseError::Hex(_))));
    }

    #[test]
    fn conversions() {
        let bytes = [7u8; 32];
        let hash: Hash = bytes.into();
        assert_eq!(*hash, bytes);
        let back: [u8; 32] = hash.into();
        assert_eq!(back, bytes);
        assert_eq!(Hash::try_from(&bytes[..]).unwrap(), hash);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = PubKey([1u8; 32]);
        let b = PubKey([2u8; 32]);
        assert!(a < b);
    }
}
