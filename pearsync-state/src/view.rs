//! View - the persisted path → FileMeta manifest
//!
//! A derived materialization; the source of truth is the union of the
//! writer logs. Uses redb. Tables:
//! - `manifest`: path (utf-8) → FileMeta proto bytes
//! - `meta`: bookkeeping (version counter, per-writer applied frontier,
//!   writer-set membership)
//!
//! The manifest is a plain fold of the operations the Linearizer hands
//! to `apply_batch`, in exactly that order: a `put` upserts the path, a
//! `del` removes it, and a later op on the same path simply overwrites
//! an earlier one. The Linearizer owns the total order; the View never
//! re-derives a winner of its own.
//!
//! Everything a batch touches commits in one write transaction, so the
//! frontier, version and manifest can never disagree on disk.

use pearsync_model::{FileMeta, Operation, PubKey};
use prost::Message;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const MANIFEST: TableDefinition<&str, &[u8]> = TableDefinition::new("manifest");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const KEY_VERSION: &str = "version";
const KEY_WRITERS: &str = "writers";
const KEY_REMOVED: &str = "removed";
const FRONTIER_PREFIX: &str = "applied:";

/// Errors from view operations
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
}

/// One linearized operation ready for application.
#[derive(Debug, Clone)]
pub struct ApplyItem {
    /// The writer whose log the block came from.
    pub author: PubKey,
    /// The block's sequence in that log (frontier moves here).
    pub seq: u64,
    /// The decoded operation, or None for a malformed payload
    /// (frontier still advances; the manifest is untouched).
    pub op: Option<Operation>,
}

/// The manifest store.
pub struct View {
    db: Database,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View").finish_non_exhaustive()
    }
}

impl View {
    /// Open or create the view database in `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, ViewError> {
        let dir = state_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db = Database::create(dir.join("view.db"))?;

        // Make sure both tables exist so read paths never special-case.
        let txn = db.begin_write()?;
        {
            txn.open_table(MANIFEST)?;
            txn.open_table(META)?;
        }
        txn.commit()?;

        Ok(Self { db })
    }

    /// Monotonic version: the count of applied state-mutating ops.
    pub fn version(&self) -> Result<u64, ViewError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META)?;
        Ok(read_u64(&table, KEY_VERSION)?.unwrap_or(0))
    }

    /// Point lookup of a manifest entry.
    pub fn get(&self, path: &str) -> Result<Option<FileMeta>, ViewError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MANIFEST)?;
        match table.get(path)? {
            Some(value) => Ok(Some(decode_meta(value.value())?)),
            None => Ok(None),
        }
    }

    /// Full scan, ordered by path.
    pub fn scan(&self) -> Result<Vec<(String, FileMeta)>, ViewError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MANIFEST)?;
        let mut entries = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            entries.push((key.value().to_string(), decode_meta(value.value())?));
        }
        Ok(entries)
    }

    /// The persisted applied frontier: writer → last applied seq.
    pub fn frontier(&self) -> Result<BTreeMap<PubKey, u64>, ViewError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META)?;
        let mut frontier = BTreeMap::new();
        for item in table.iter()? {
            let (key, value) = item?;
            let key = key.value().to_string();
            if let Some(hex_key) = key.strip_prefix(FRONTIER_PREFIX) {
                if let Ok(writer) = PubKey::from_hex(hex_key) {
                    let bytes: [u8; 8] = value
                        .value()
                        .try_into()
                        .map_err(|_| ViewError::Conversion("bad frontier value".into()))?;
                    frontier.insert(writer, u64::from_be_bytes(bytes));
                }
            }
        }
        Ok(frontier)
    }

    /// The persisted writer-set: (admitted in admission order, removed).
    pub fn writer_sets(&self) -> Result<(Vec<PubKey>, Vec<PubKey>), ViewError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META)?;
        let admitted = read_keys(&table, KEY_WRITERS)?;
        let removed = read_keys(&table, KEY_REMOVED)?;
        Ok((admitted, removed))
    }

    /// Apply one linearized batch atomically: manifest changes, version,
    /// frontier moves and the (possibly updated) writer sets.
    ///
    /// Items apply in the order given; a later op on a path overwrites
    /// whatever an earlier one left there. Returns the new version.
    /// Malformed ops advance the frontier without touching the manifest
    /// or the version - a log can never poison the view.
    pub fn apply_batch(
        &self,
        items: &[ApplyItem],
        admitted: &[PubKey],
        removed: &[PubKey],
    ) -> Result<u64, ViewError> {
        let txn = self.db.begin_write()?;
        let version;
        {
            let mut manifest = txn.open_table(MANIFEST)?;
            let mut meta = txn.open_table(META)?;

            let mut v = read_u64(&meta, KEY_VERSION)?.unwrap_or(0);

            for item in items {
                match &item.op {
                    Some(Operation::Put { path, meta: file }) => {
                        let encoded = encode_meta(file.clone());
                        manifest.insert(path.as_str(), encoded.as_slice())?;
                        v += 1;
                    }
                    Some(Operation::Del { path }) => {
                        manifest.remove(path.as_str())?;
                        v += 1;
                    }
                    Some(Operation::AddWriter { .. })
                    | Some(Operation::RemoveWriter { .. }) => {
                        // Membership state lands via the writer-set keys
                        // below; the op still counts as state-mutating.
                        v += 1;
                    }
                    None => {}
                }
                let frontier_key = format!("{}{}", FRONTIER_PREFIX, item.author);
                meta.insert(frontier_key.as_str(), item.seq.to_be_bytes().as_slice())?;
            }

            meta.insert(KEY_VERSION, v.to_be_bytes().as_slice())?;
            meta.insert(KEY_WRITERS, encode_keys(admitted).as_slice())?;
            meta.insert(KEY_REMOVED, encode_keys(removed).as_slice())?;
            version = v;
        }
        txn.commit()?;
        Ok(version)
    }
}

fn decode_meta(bytes: &[u8]) -> Result<FileMeta, ViewError> {
    let proto = pearsync_proto::storage::FileMeta::decode(bytes)?;
    FileMeta::try_from(proto).map_err(|e| ViewError::Conversion(e.to_string()))
}

fn encode_meta(meta: FileMeta) -> Vec<u8> {
    pearsync_proto::storage::FileMeta::from(meta).encode_to_vec()
}

fn encode_keys(keys: &[PubKey]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(keys.len() * 32);
    for key in keys {
        buf.extend_from_slice(key.as_bytes());
    }
    buf
}

fn read_keys(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Vec<PubKey>, ViewError> {
    let Some(value) = table.get(key)? else {
        return Ok(Vec::new());
    };
    let bytes = value.value();
    if bytes.len() % 32 != 0 {
        return Err(ViewError::Conversion("bad writer-set encoding".into()));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|chunk| PubKey::try_from(chunk).expect("chunk is 32 bytes"))
        .collect())
}

fn read_u64(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<u64>, ViewError> {
    match table.get(key)? {
        Some(value) => {
            let bytes: [u8; 8] = value
                .value()
                .try_into()
                .map_err(|_| ViewError::Conversion(format!("bad u64 at {}", key)))?;
            Ok(Some(u64::from_be_bytes(bytes)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pearsync_model::FileMeta;

    fn put_item(author: PubKey, seq: u64, path: &str, content: &[u8]) -> ApplyItem {
        ApplyItem {
            author,
            seq,
            op: Some(Operation::Put {
                path: path.to_string(),
                meta: FileMeta::new(content.to_vec(), 1_000, 0o644, author),
            }),
        }
    }

    fn del_item(author: PubKey, seq: u64, path: &str) -> ApplyItem {
        ApplyItem {
            author,
            seq,
            op: Some(Operation::Del { path: path.to_string() }),
        }
    }

    #[test]
    fn apply_put_then_get() {
        let tmp = tempfile::tempdir().unwrap();
        let view = View::open(tmp.path()).unwrap();
        let author = PubKey([1; 32]);

        let version = view
            .apply_batch(&[put_item(author, 1, "a.txt", b"hello")], &[author], &[])
            .unwrap();
        assert_eq!(version, 1);

        let meta = view.get("a.txt").unwrap().unwrap();
        assert_eq!(meta.content, b"hello");
        assert_eq!(meta.author, author);
        assert!(view.get("b.txt").unwrap().is_none());
    }

    #[test]
    fn del_removes_entry_and_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let view = View::open(tmp.path()).unwrap();
        let author = PubKey([1; 32]);

        view.apply_batch(&[put_item(author, 1, "a.txt", b"x")], &[author], &[])
            .unwrap();
        let version = view
            .apply_batch(&[del_item(author, 2, "a.txt")], &[author], &[])
            .unwrap();
        assert_eq!(version, 2);
        assert!(view.get("a.txt").unwrap().is_none());
        assert!(view.scan().unwrap().is_empty());
    }

    #[test]
    fn malformed_op_advances_frontier_not_version() {
        let tmp = tempfile::tempdir().unwrap();
        let view = View::open(tmp.path()).unwrap();
        let author = PubKey([1; 32]);

        let version = view
            .apply_batch(&[ApplyItem { author, seq: 1, op: None }], &[author], &[])
            .unwrap();
        assert_eq!(version, 0);
        assert_eq!(view.frontier().unwrap().get(&author), Some(&1));
    }

    #[test]
    fn scan_is_path_ordered() {
        let tmp = tempfile::tempdir().unwrap();
        let view = View::open(tmp.path()).unwrap();
        let author = PubKey([1; 32]);

        view.apply_batch(
            &[
                put_item(author, 1, "b/file", b"2"),
                put_item(author, 2, "a/file", b"1"),
                put_item(author, 3, "c", b"3"),
            ],
            &[author],
            &[],
        )
        .unwrap();

        let paths: Vec<String> = view.scan().unwrap().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["a/file", "b/file", "c"]);
    }

    #[test]
    fn frontier_and_writer_sets_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let a = PubKey([1; 32]);
        let b = PubKey([2; 32]);
        {
            let view = View::open(tmp.path()).unwrap();
            view.apply_batch(&[put_item(a, 7, "x", b"v")], &[a, b], &[b])
                .unwrap();
        }

        let view = View::open(tmp.path()).unwrap();
        assert_eq!(view.version().unwrap(), 1);
        assert_eq!(view.frontier().unwrap().get(&a), Some(&7));
        let (admitted, removed) = view.writer_sets().unwrap();
        assert_eq!(admitted, vec![a, b]);
        assert_eq!(removed, vec![b]);
    }

    #[test]
    fn later_applied_put_wins_regardless_of_seq() {
        // Cross-writer conflict on one path: the op applied later in the
        // linearized order wins, full stop. Writer seq numbers have no
        // cross-writer meaning - a late joiner's seq-1 edit overwrites a
        // veteran writer's seq-10 entry when it linearizes after it.
        let tmp = tempfile::tempdir().unwrap();
        let view = View::open(tmp.path()).unwrap();
        let veteran = PubKey([1; 32]);
        let newcomer = PubKey([2; 32]);

        view.apply_batch(
            &[put_item(veteran, 10, "doc.txt", b"veteran edit")],
            &[veteran, newcomer],
            &[],
        )
        .unwrap();
        view.apply_batch(
            &[put_item(newcomer, 1, "doc.txt", b"newcomer edit")],
            &[veteran, newcomer],
            &[],
        )
        .unwrap();

        let meta = view.get("doc.txt").unwrap().unwrap();
        assert_eq!(meta.content, b"newcomer edit");
        assert_eq!(meta.author, newcomer);
    }

    #[test]
    fn del_then_later_put_recreates_entry() {
        // An entry removed by a linearized del is recreated by a
        // subsequent linearized put, even one from a writer with a
        // lower seq than the delete's.
        let tmp = tempfile::tempdir().unwrap();
        let view = View::open(tmp.path()).unwrap();
        let a = PubKey([1; 32]);
        let b = PubKey([2; 32]);

        view.apply_batch(&[put_item(a, 1, "x.txt", b"first")], &[a, b], &[])
            .unwrap();
        view.apply_batch(&[del_item(b, 5, "x.txt")], &[a, b], &[])
            .unwrap();
        assert!(view.get("x.txt").unwrap().is_none());

        view.apply_batch(&[put_item(a, 2, "x.txt", b"reborn")], &[a, b], &[])
            .unwrap();
        assert_eq!(view.get("x.txt").unwrap().unwrap().content, b"reborn");
    }

    #[test]
    fn every_applied_op_bumps_version() {
        // Overwrites count like any other mutation: two puts to one
        // path are two state-mutating ops, and the second one stands.
        let tmp = tempfile::tempdir().unwrap();
        let view = View::open(tmp.path()).unwrap();
        let a = PubKey([1; 32]);
        let b = PubKey([2; 32]);

        let version = view
            .apply_batch(&[put_item(b, 9, "x", b"first")], &[a, b], &[])
            .unwrap();
        assert_eq!(version, 1);

        let version = view
            .apply_batch(&[put_item(a, 1, "x", b"second")], &[a, b], &[])
            .unwrap();
        assert_eq!(version, 2);

        assert_eq!(view.get("x").unwrap().unwrap().content, b"second");
        assert_eq!(view.frontier().unwrap().get(&a), Some(&1));
        assert_eq!(view.frontier().unwrap().get(&b), Some(&9));
    }
}
