//! Out-of-order replication and crash-recovery behavior of BlockStore.

use pearsync_log::{BlockStore, LogSet, StoreError};
use pearsync_model::WriterIdentity;

fn origin_with_blocks(
    tmp: &tempfile::TempDir,
    id: &WriterIdentity,
    n: u8,
) -> (BlockStore, Vec<pearsync_log::Block>) {
    let mut origin = BlockStore::open(tmp.path(), id.public_key(), true).unwrap();
    let mut blocks = Vec::new();
    for i in 1..=n {
        blocks.push(origin.append(id, vec![i]).unwrap());
    }
    (origin, blocks)
}

#[test]
fn two_replica_gap_fill() {
    let tmp_origin = tempfile::tempdir().unwrap();
    let tmp_replica = tempfile::tempdir().unwrap();
    let id = WriterIdentity::generate();

    let (origin, blocks) = origin_with_blocks(&tmp_origin, &id, 3);

    // The replica sees 3 first (out of order via gossip), then 1 and 2
    // arrive through a range sync.
    let mut replica = BlockStore::open(tmp_replica.path(), id.public_key(), false).unwrap();
    assert!(replica.ingest(blocks[2].clone(), None).unwrap().is_empty());
    assert_eq!(replica.length(), 0);

    replica.ingest(blocks[0].clone(), None).unwrap();
    let released = replica.ingest(blocks[1].clone(), None).unwrap();
    assert_eq!(
        released.iter().map(|b| b.seq).collect::<Vec<_>>(),
        vec![2, 3]
    );

    assert_eq!(replica.length(), 3);
    assert_eq!(replica.tip(), origin.tip());
}

#[test]
fn replica_persists_across_reopen() {
    let tmp_origin = tempfile::tempdir().unwrap();
    let tmp_replica = tempfile::tempdir().unwrap();
    let id = WriterIdentity::generate();

    let (_origin, blocks) = origin_with_blocks(&tmp_origin, &id, 5);

    {
        let mut replica =
            BlockStore::open(tmp_replica.path(), id.public_key(), false).unwrap();
        for block in &blocks {
            replica.ingest(block.clone(), None).unwrap();
        }
    }

    // Reopen replays and re-verifies the persisted chain.
    let replica = BlockStore::open(tmp_replica.path(), id.public_key(), false).unwrap();
    assert_eq!(replica.length(), 5);
    assert_eq!(replica.get(4).unwrap().unwrap().payload, vec![4]);
}

#[test]
fn buffered_orphans_do_not_persist() {
    let tmp_origin = tempfile::tempdir().unwrap();
    let tmp_replica = tempfile::tempdir().unwrap();
    let id = WriterIdentity::generate();

    let (_origin, blocks) = origin_with_blocks(&tmp_origin, &id, 2);

    {
        let mut replica =
            BlockStore::open(tmp_replica.path(), id.public_key(), false).unwrap();
        // Only the orphan arrives before the process dies.
        replica.ingest(blocks[1].clone(), None).unwrap();
        assert_eq!(replica.orphan_count(), 1);
    }

    // After restart the gap is simply still open; re-sync fills it.
    let mut replica = BlockStore::open(tmp_replica.path(), id.public_key(), false).unwrap();
    assert_eq!(replica.length(), 0);
    assert_eq!(replica.orphan_count(), 0);

    replica.ingest(blocks[0].clone(), None).unwrap();
    replica.ingest(blocks[1].clone(), None).unwrap();
    assert_eq!(replica.length(), 2);
}

#[test]
fn log_set_tracks_multiple_writers() {
    let tmp_a = tempfile::tempdir().unwrap();
    let tmp_set = tempfile::tempdir().unwrap();
    let creator = WriterIdentity::generate();
    let other = WriterIdentity::generate();

    let (_origin, blocks) = origin_with_blocks(&tmp_a, &other, 2);

    let mut set = LogSet::open(tmp_set.path(), creator.public_key(), creator.public_key()).unwrap();
    set.local_store().unwrap().append(&creator, b"mine".to_vec()).unwrap();

    // A peer starts replicating a previously unknown writer's log: the
    // set opens a store for it on demand.
    let store = set.get_or_create(other.public_key()).unwrap();
    for block in blocks {
        store.ingest(block, None).unwrap();
    }

    let state = set.sync_state();
    assert_eq!(state.get(&creator.public_key()), 1);
    assert_eq!(state.get(&other.public_key()), 2);
}

#[test]
fn append_to_foreign_log_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let creator = WriterIdentity::generate();
    let other = WriterIdentity::generate();

    let mut set = LogSet::open(tmp.path(), creator.public_key(), creator.public_key()).unwrap();
    let foreign = set.get_or_create(other.public_key()).unwrap();

    assert!(matches!(
        foreign.append(&other, b"x".to_vec()),
        Err(StoreError::NotWritable)
    ));
}
