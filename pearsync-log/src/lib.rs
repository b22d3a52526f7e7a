//! Append-only signed block logs
//!
//! One log per writer key. Each block is signed over its chain position
//! (`prev_hash || seq || payload`) and hash-linked to its predecessor.
//! The `LogSet` holds one `BlockStore` per known writer.

pub mod block;
pub mod log;
pub mod set;
pub mod store;

pub use block::{Block, BlockError, ChainTip};
pub use log::{LogError, LogReader};
pub use set::{LogSet, SyncState};
pub use store::{BlockStore, BlockValidation, StoreError};

/// Maximum encoded size of a single block.
///
/// Content is embedded in `put` payloads, so this bounds the largest
/// file a single operation can carry.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;
