//! LogSet - every known writer's log for one workspace
//!
//! At most one `BlockStore` per writer key in a process. The bootstrap
//! log's key is fixed at open time; other keys become known when an
//! `add-writer` op linearizes or a peer starts replicating them.

use crate::store::{BlockStore, StoreError};
use pearsync_model::PubKey;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Per-writer readable lengths, the summary exchanged during replication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    lengths: BTreeMap<PubKey, u64>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, writer: PubKey, length: u64) {
        self.lengths.insert(writer, length);
    }

    pub fn get(&self, writer: &PubKey) -> u64 {
        self.lengths.get(writer).copied().unwrap_or(0)
    }

    pub fn writers(&self) -> impl Iterator<Item = (&PubKey, u64)> {
        self.lengths.iter().map(|(k, v)| (k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Ranges this side is missing relative to `remote`:
    /// `(writer, from_seq, to_seq)` inclusive.
    pub fn missing_from(&self, remote: &SyncState) -> Vec<(PubKey, u64, u64)> {
        let mut ranges = Vec::new();
        for (writer, remote_len) in remote.writers() {
            let local_len = self.get(writer);
            if remote_len > local_len {
                ranges.push((*writer, local_len + 1, remote_len));
            }
        }
        ranges
    }
}

/// The set of block stores for one workspace, sharing a logs directory.
pub struct LogSet {
    logs_dir: PathBuf,
    bootstrap: PubKey,
    local: PubKey,
    stores: HashMap<PubKey, BlockStore>,
}

impl LogSet {
    /// Open the log set: load every `<hex>.log` under `logs_dir`,
    /// ensuring stores for the bootstrap and local writer keys exist.
    pub fn open(
        logs_dir: impl AsRef<Path>,
        bootstrap: PubKey,
        local: PubKey,
    ) -> Result<Self, StoreError> {
        let logs_dir = logs_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&logs_dir).map_err(crate::log::LogError::Io)?;

        let mut set = Self {
            logs_dir,
            bootstrap,
            local,
            stores: HashMap::new(),
        };

        for entry in std::fs::read_dir(&set.logs_dir)
            .map_err(crate::log::LogError::Io)?
            .flatten()
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(author) = PubKey::from_hex(stem) else {
                continue; // skip stray files
            };
            set.open_store(author)?;
        }

        set.get_or_create(bootstrap)?;
        set.get_or_create(local)?;
        Ok(set)
    }

    fn open_store(&mut self, author: PubKey) -> Result<&mut BlockStore, StoreError> {
        if !self.stores.contains_key(&author) {
            let writable = author == self.local;
            let store = BlockStore::open(&self.logs_dir, author, writable)?;
            tracing::debug!(
                writer = %author.fmt_short(),
                len = store.length(),
                writable,
                "opened log"
            );
            self.stores.insert(author, store);
        }
        Ok(self.stores.get_mut(&author).expect("inserted above"))
    }

    /// The workspace (bootstrap) key.
    pub fn bootstrap(&self) -> &PubKey {
        &self.bootstrap
    }

    /// The local writer key.
    pub fn local(&self) -> &PubKey {
        &self.local
    }

    /// Get a store, creating an empty one if the writer is new.
    pub fn get_or_create(&mut self, author: PubKey) -> Result<&mut BlockStore, StoreError> {
        self.open_store(author)
    }

    /// Get an existing store.
    pub fn get(&self, author: &PubKey) -> Option<&BlockStore> {
        self.stores.get(author)
    }

    /// Get an existing store, mutably.
    pub fn get_mut(&mut self, author: &PubKey) -> Option<&mut BlockStore> {
        self.stores.get_mut(author)
    }

    /// The local writer's store.
    pub fn local_store(&mut self) -> Result<&mut BlockStore, StoreError> {
        self.open_store(self.local)
    }

    /// All writer keys with an open store.
    pub fn writers(&self) -> Vec<PubKey> {
        self.stores.keys().copied().collect()
    }

    /// Summary of readable lengths across all logs.
    pub fn sync_state(&self) -> SyncState {
        let mut state = SyncState::new();
        for (author, store) in &self.stores {
            state.set(*author, store.length());
        }
        state
    }
}

impl std::fmt::Debug for LogSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSet")
            .field("bootstrap", &self.bootstrap.fmt_short())
            .field("local", &self.local.fmt_short())
            .field("logs", &self.stores.len())
            .finish()
    }
}
