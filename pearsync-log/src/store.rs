//! BlockStore - a single writer's append-only hash-chained log
//!
//! Validates blocks before admission (correct seq, valid signature at
//! the chain position) and persists admitted blocks to disk. Blocks
//! arriving ahead of the contiguous frontier are buffered and admitted
//! once the gap fills; only contiguous blocks are readable.

use crate::block::{Block, BlockError, ChainTip};
use crate::log::{self, LogError};
use pearsync_model::{PubKey, WriterIdentity};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on buffered out-of-order blocks per log.
const MAX_ORPHANS: usize = 1024;

/// Errors from block store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("store is read-only: local key is not this log's writer")]
    NotWritable,

    #[error("replication verification failed for block {seq}: {source}")]
    Verification {
        seq: u64,
        #[source]
        source: BlockError,
    },

    #[error("corrupt log for writer {writer}: {reason}")]
    Corrupt { writer: String, reason: String },
}

/// Result of validating an incoming block without admitting it
#[derive(Debug)]
pub enum BlockValidation {
    /// Next contiguous block, signature checks out.
    Valid,
    /// Already admitted (seq at or below the tip).
    Duplicate,
    /// Ahead of the frontier; buffer until the gap fills.
    Orphan,
    /// Fails verification at its claimed position.
    Invalid(BlockError),
}

/// A single writer's append-only log with tip tracking.
pub struct BlockStore {
    author: PubKey,
    log_path: PathBuf,
    tip: ChainTip,
    writable: bool,
    /// Out-of-order buffer: seq → (block, peer that supplied it).
    orphans: BTreeMap<u64, (Block, Option<PubKey>)>,
    /// Peers that sent an invalid block for this log.
    banned_peers: HashSet<PubKey>,
}

impl BlockStore {
    /// Open (or create) the store for `author` under `logs_dir`,
    /// replaying and verifying the persisted chain.
    ///
    /// A log that fails verification is unusable; the error is fatal for
    /// this workspace store.
    pub fn open(
        logs_dir: impl AsRef<Path>,
        author: PubKey,
        writable: bool,
    ) -> Result<Self, StoreError> {
        let log_path = logs_dir.as_ref().join(format!("{}.log", author));

        let mut tip = ChainTip::genesis();
        for block in log::read_blocks(&log_path)? {
            tip = block
                .verify_against(&author, &tip)
                .map_err(|e| StoreError::Corrupt {
                    writer: author.to_string(),
                    reason: e.to_string(),
                })?;
        }

        Ok(Self {
            author,
            log_path,
            tip,
            writable,
            orphans: BTreeMap::new(),
            banned_peers: HashSet::new(),
        })
    }

    /// The writer key this log belongs to.
    pub fn author(&self) -> &PubKey {
        &self.author
    }

    /// True when the local identity may append to this log.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Contiguous (readable) length of the log.
    pub fn length(&self) -> u64 {
        self.tip.seq
    }

    /// Current chain tip.
    pub fn tip(&self) -> &ChainTip {
        &self.tip
    }

    /// Append a new locally-authored block. Fails on a read-only store.
    pub fn append(
        &mut self,
        identity: &WriterIdentity,
        payload: Vec<u8>,
    ) -> Result<Block, StoreError> {
        if !self.writable || identity.public_key() != self.author {
            return Err(StoreError::NotWritable);
        }

        let block = Block::sign_next(identity, &self.tip, payload);
        log::append_block(&self.log_path, &block)?;
        self.tip = ChainTip {
            seq: block.seq,
            hash: block.chain_hash(&self.tip.hash),
        };
        Ok(block)
    }

    /// Classify an incoming block against the current frontier.
    pub fn validate(&self, block: &Block) -> BlockValidation {
        if block.seq <= self.tip.seq {
            return BlockValidation::Duplicate;
        }
        if block.seq > self.tip.next_seq() {
            return BlockValidation::Orphan;
        }
        match block.verify_against(&self.author, &self.tip) {
            Ok(_) => BlockValidation::Valid,
            Err(e) => BlockValidation::Invalid(e),
        }
    }

    /// Ingest a replicated block. Returns the blocks that became
    /// readable, in order (the block itself plus any buffered successors
    /// the gap-fill released).
    ///
    /// A verification failure bans `from` for this log and surfaces
    /// `StoreError::Verification`; the byte channel may stay open for
    /// other logs.
    pub fn ingest(
        &mut self,
        block: Block,
        from: Option<PubKey>,
    ) -> Result<Vec<Block>, StoreError> {
        if let Some(peer) = &from {
            if self.banned_peers.contains(peer) {
                return Ok(Vec::new());
            }
        }

        match self.validate(&block) {
            BlockValidation::Duplicate => Ok(Vec::new()),
            BlockValidation::Orphan => {
                if self.orphans.len() >= MAX_ORPHANS {
                    tracing::warn!(
                        writer = %self.author.fmt_short(),
                        seq = block.seq,
                        "orphan buffer full, dropping block"
                    );
                    return Ok(Vec::new());
                }
                self.orphans.entry(block.seq).or_insert((block, from));
                Ok(Vec::new())
            }
            BlockValidation::Invalid(e) => {
                if let Some(peer) = from {
                    tracing::warn!(
                        writer = %self.author.fmt_short(),
                        peer = %peer.fmt_short(),
                        seq = block.seq,
                        "invalid block, banning peer for this log"
                    );
                    self.banned_peers.insert(peer);
                }
                Err(StoreError::Verification {
                    seq: block.seq,
                    source: e,
                })
            }
            BlockValidation::Valid => {
                let mut admitted = Vec::new();
                self.commit(&block)?;
                admitted.push(block);

                // Drain buffered successors while the chain stays contiguous.
                while let Some((block, source)) = self.orphans.remove(&self.tip.next_seq()) {
                    match block.verify_against(&self.author, &self.tip) {
                        Ok(_) => {
                            self.commit(&block)?;
                            admitted.push(block);
                        }
                        Err(e) => {
                            if let Some(peer) = source {
                                self.banned_peers.insert(peer);
                            }
                            tracing::warn!(
                                writer = %self.author.fmt_short(),
                                seq = block.seq,
                                error = %e,
                                "buffered block failed verification, discarded"
                            );
                            break;
                        }
                    }
                }
                Ok(admitted)
            }
        }
    }

    fn commit(&mut self, block: &Block) -> Result<(), StoreError> {
        log::append_block(&self.log_path, block)?;
        self.tip = ChainTip {
            seq: block.seq,
            hash: block.chain_hash(&self.tip.hash),
        };
        Ok(())
    }

    /// Read a single readable block by sequence, from disk.
    pub fn get(&self, seq: u64) -> Result<Option<Block>, StoreError> {
        if seq == 0 || seq > self.tip.seq {
            return Ok(None);
        }
        Ok(log::read_range(&self.log_path, seq, seq)?.into_iter().next())
    }

    /// Read readable blocks in `[from_seq, to_seq]`, clamped to the tip.
    pub fn range(&self, from_seq: u64, to_seq: u64) -> Result<Vec<Block>, StoreError> {
        let to_seq = to_seq.min(self.tip.seq);
        if from_seq > to_seq {
            return Ok(Vec::new());
        }
        Ok(log::read_range(&self.log_path, from_seq, to_seq)?)
    }

    /// Whether `peer` is banned from supplying blocks for this log.
    pub fn is_banned(&self, peer: &PubKey) -> bool {
        self.banned_peers.contains(peer)
    }

    /// Number of buffered out-of-order blocks.
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("author", &self.author.fmt_short())
            .field("len", &self.tip.seq)
            .field("writable", &self.writable)
            .field("orphans", &self.orphans.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writable_store(tmp: &tempfile::TempDir, id: &WriterIdentity) -> BlockStore {
        BlockStore::open(tmp.path(), id.public_key(), true).unwrap()
    }

    #[test]
    fn append_advances_tip() {
        let tmp = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();
        let mut store = writable_store(&tmp, &id);

        assert_eq!(store.length(), 0);
        store.append(&id, b"a".to_vec()).unwrap();
        store.append(&id, b"b".to_vec()).unwrap();
        assert_eq!(store.length(), 2);
    }

    #[test]
    fn append_rejected_on_readonly_store() {
        let tmp = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();
        let mut store = BlockStore::open(tmp.path(), id.public_key(), false).unwrap();

        assert!(matches!(
            store.append(&id, b"a".to_vec()),
            Err(StoreError::NotWritable)
        ));
    }

    #[test]
    fn reopen_replays_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();
        {
            let mut store = writable_store(&tmp, &id);
            for i in 0..3 {
                store.append(&id, vec![i]).unwrap();
            }
        }

        let store = writable_store(&tmp, &id);
        assert_eq!(store.length(), 3);
    }

    #[test]
    fn ingest_in_order() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();

        let mut origin = writable_store(&tmp_a, &id);
        let b1 = origin.append(&id, b"1".to_vec()).unwrap();
        let b2 = origin.append(&id, b"2".to_vec()).unwrap();

        let mut replica = BlockStore::open(tmp_b.path(), id.public_key(), false).unwrap();
        assert_eq!(replica.ingest(b1, None).unwrap().len(), 1);
        assert_eq!(replica.ingest(b2, None).unwrap().len(), 1);
        assert_eq!(replica.length(), 2);
        assert_eq!(replica.tip(), origin.tip());
    }

    #[test]
    fn orphan_buffered_and_released_on_gap_fill() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();

        let mut origin = writable_store(&tmp_a, &id);
        let b1 = origin.append(&id, b"1".to_vec()).unwrap();
        let b2 = origin.append(&id, b"2".to_vec()).unwrap();
        let b3 = origin.append(&id, b"3".to_vec()).unwrap();

        let mut replica = BlockStore::open(tmp_b.path(), id.public_key(), false).unwrap();

        // 3 and 2 arrive ahead of 1: both buffer, nothing readable.
        assert!(replica.ingest(b3, None).unwrap().is_empty());
        assert!(replica.ingest(b2, None).unwrap().is_empty());
        assert_eq!(replica.length(), 0);
        assert_eq!(replica.orphan_count(), 2);

        // 1 arrives: the whole chain becomes readable at once.
        let admitted = replica.ingest(b1, None).unwrap();
        assert_eq!(admitted.iter().map(|b| b.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(replica.length(), 3);
        assert_eq!(replica.orphan_count(), 0);
    }

    #[test]
    fn duplicate_is_a_noop() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();

        let mut origin = writable_store(&tmp_a, &id);
        let b1 = origin.append(&id, b"1".to_vec()).unwrap();

        let mut replica = BlockStore::open(tmp_b.path(), id.public_key(), false).unwrap();
        replica.ingest(b1.clone(), None).unwrap();
        assert!(replica.ingest(b1, None).unwrap().is_empty());
        assert_eq!(replica.length(), 1);
    }

    #[test]
    fn forged_block_bans_peer() {
        let tmp = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();
        let forger = WriterIdentity::generate();
        let peer = PubKey([9u8; 32]);

        let mut store = BlockStore::open(tmp.path(), id.public_key(), false).unwrap();

        // Signed by the wrong key for this log.
        let forged = Block::sign_next(&forger, &ChainTip::genesis(), b"evil".to_vec());
        let err = store.ingest(forged, Some(peer)).unwrap_err();
        assert!(matches!(err, StoreError::Verification { seq: 1, .. }));
        assert!(store.is_banned(&peer));

        // Subsequent blocks from the banned peer are ignored, valid or not.
        let honest = Block::sign_next(&id, &ChainTip::genesis(), b"ok".to_vec());
        assert!(store.ingest(honest, Some(peer)).unwrap().is_empty());
        assert_eq!(store.length(), 0);
    }

    #[test]
    fn get_and_range_read_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();
        let mut store = writable_store(&tmp, &id);
        for i in 1..=4u8 {
            store.append(&id, vec![i]).unwrap();
        }

        assert_eq!(store.get(3).unwrap().unwrap().payload, vec![3]);
        assert!(store.get(0).unwrap().is_none());
        assert!(store.get(9).unwrap().is_none());

        let range = store.range(2, 100).unwrap();
        assert_eq!(range.iter().map(|b| b.seq).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn corrupt_log_fails_open() {
        let tmp = tempfile::tempdir().unwrap();
        let id = WriterIdentity::generate();
        {
            let mut store = writable_store(&tmp, &id);
            store.append(&id, b"data".to_vec()).unwrap();
        }

        // Truncate the record tail; reopen must refuse.
        let path = tmp.path().join(format!("{}.log", id.public_key()));
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - 3).unwrap();
        drop(file);

        assert!(BlockStore::open(tmp.path(), id.public_key(), true).is_err());
    }
}
