//! Log blocks with chain-position signatures

use pearsync_model::crypto;
use pearsync_model::{Hash, PubKey, Signature, WriterIdentity};
use pearsync_proto::storage::SignedBlock;
use prost::Message;
use thiserror::Error;

/// Errors from block verification and decoding
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("signature verification failed")]
    InvalidSignature,

    #[error("proto decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("invalid signature length: expected 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("invalid sequence: expected {expected}, got {got}")]
    InvalidSequence { expected: u64, got: u64 },
}

/// A single block in a writer's log.
///
/// `prev_hash` is not stored: it is implied by the chain position and
/// recomputed during verification, so a block can never be presented at
/// a different position than the one it was signed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the author's chain, 1-based.
    pub seq: u64,
    /// Encoded operation bytes.
    pub payload: Vec<u8>,
    /// Ed25519 signature over `prev_hash || seq || payload`.
    pub signature: Signature,
}

/// The tip of a chain (last committed block's position and chain hash).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainTip {
    /// Sequence number of the last block (0 for an empty chain).
    pub seq: u64,
    /// Chain hash of the last block (`Hash::ZERO` for an empty chain).
    pub hash: Hash,
}

impl ChainTip {
    /// The tip of an empty chain.
    pub fn genesis() -> Self {
        Self {
            seq: 0,
            hash: Hash::ZERO,
        }
    }

    /// The sequence the next block must carry.
    pub fn next_seq(&self) -> u64 {
        self.seq + 1
    }
}

impl Default for ChainTip {
    fn default() -> Self {
        Self::genesis()
    }
}

impl Block {
    /// Build and sign the next block after `tip`.
    pub fn sign_next(identity: &WriterIdentity, tip: &ChainTip, payload: Vec<u8>) -> Self {
        let seq = tip.next_seq();
        let signature = crypto::sign_block(identity.signing_key(), &tip.hash, seq, &payload);
        Self {
            seq,
            payload,
            signature,
        }
    }

    /// Verify this block as the successor of `tip` in `author`'s chain.
    /// Returns the new tip on success.
    pub fn verify_against(&self, author: &PubKey, tip: &ChainTip) -> Result<ChainTip, BlockError> {
        if self.seq != tip.next_seq() {
            return Err(BlockError::InvalidSequence {
                expected: tip.next_seq(),
                got: self.seq,
            });
        }
        crypto::verify_block(author, &tip.hash, self.seq, &self.payload, &self.signature)
            .map_err(|_| BlockError::InvalidSignature)?;
        Ok(ChainTip {
            seq: self.seq,
            hash: crypto::block_hash(&tip.hash, self.seq, &self.payload, &self.signature),
        })
    }

    /// The chain hash this block gets at its position.
    pub fn chain_hash(&self, prev_hash: &Hash) -> Hash {
        crypto::block_hash(prev_hash, self.seq, &self.payload, &self.signature)
    }

    /// Encode to protobuf bytes.
    pub fn encode(&self) -> Vec<u8> {
        SignedBlock::from(self.clone()).encode_to_vec()
    }

    /// Decode from protobuf bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        SignedBlock::decode(bytes)?.try_into()
    }
}

impl From<Block> for SignedBlock {
    fn from(block: Block) -> Self {
        SignedBlock {
            seq: block.seq,
            payload: block.payload,
            signature: block.signature.to_vec(),
        }
    }
}

impl TryFrom<SignedBlock> for Block {
    type Error = BlockError;

    fn try_from(proto: SignedBlock) -> Result<Self, Self::Error> {
        let signature = Signature::try_from(proto.signature)
            .map_err(|v| BlockError::InvalidSignatureLength(v.len()))?;
        Ok(Block {
            seq: proto.seq,
            payload: proto.payload,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_chain_of_three() {
        let id = WriterIdentity::generate();
        let author = id.public_key();

        let mut tip = ChainTip::genesis();
        for i in 1..=3u64 {
            let block = Block::sign_next(&id, &tip, format!("op{}", i).into_bytes());
            assert_eq!(block.seq, i);
            tip = block.verify_against(&author, &tip).unwrap();
        }
        assert_eq!(tip.seq, 3);
        assert_ne!(tip.hash, Hash::ZERO);
    }

    #[test]
    fn verify_rejects_wrong_author() {
        let id = WriterIdentity::generate();
        let other = WriterIdentity::generate().public_key();

        let tip = ChainTip::genesis();
        let block = Block::sign_next(&id, &tip, b"op".to_vec());
        assert!(matches!(
            block.verify_against(&other, &tip),
            Err(BlockError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_rejects_gap() {
        let id = WriterIdentity::generate();
        let author = id.public_key();

        let tip = ChainTip::genesis();
        let block1 = Block::sign_next(&id, &tip, b"a".to_vec());
        let tip1 = block1.verify_against(&author, &tip).unwrap();
        let block3 = Block {
            seq: 3,
            ..Block::sign_next(&id, &tip1, b"c".to_vec())
        };
        assert!(matches!(
            block3.verify_against(&author, &tip1),
            Err(BlockError::InvalidSequence {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn verify_rejects_replayed_position() {
        // A block signed for seq 1 must not verify at seq 2 even with the
        // same payload, because the sign input binds the chain position.
        let id = WriterIdentity::generate();
        let author = id.public_key();

        let tip = ChainTip::genesis();
        let block1 = Block::sign_next(&id, &tip, b"same".to_vec());
        let tip1 = block1.verify_against(&author, &tip).unwrap();

        let replayed = Block {
            seq: 2,
            payload: block1.payload.clone(),
            signature: block1.signature,
        };
        assert!(matches!(
            replayed.verify_against(&author, &tip1),
            Err(BlockError::InvalidSignature)
        ));
    }

    #[test]
    fn encode_decode_round_trip() {
        let id = WriterIdentity::generate();
        let block = Block::sign_next(&id, &ChainTip::genesis(), b"payload".to_vec());
        let decoded = Block::decode(&block.encode()).unwrap();
        assert_eq!(decoded, block);
    }
}
