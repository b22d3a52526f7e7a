//! WriterSet - admitted writer keys for a workspace
//!
//! Membership only changes through linearized `add-writer` /
//! `remove-writer` ops, so every peer holds the same set after applying
//! the same prefix. The bootstrap key is a member from genesis.

use pearsync_model::PubKey;
use std::collections::HashSet;

/// The current writer membership.
#[derive(Debug, Clone)]
pub struct WriterSet {
    /// Admission order; the bootstrap key is first and never leaves.
    admitted: Vec<PubKey>,
    removed: HashSet<PubKey>,
}

impl WriterSet {
    /// A fresh set containing only the bootstrap writer.
    pub fn new(bootstrap: PubKey) -> Self {
        Self {
            admitted: vec![bootstrap],
            removed: HashSet::new(),
        }
    }

    /// Rebuild from persisted state (admission order + removals).
    pub fn from_parts(admitted: Vec<PubKey>, removed: Vec<PubKey>) -> Self {
        Self {
            admitted,
            removed: removed.into_iter().collect(),
        }
    }

    /// Apply a linearized `add-writer{writer}` authored by `author`.
    /// Returns true when the set actually grew.
    pub fn apply_add(&mut self, author: &PubKey, writer: PubKey) -> bool {
        if !self.contains(author) {
            // Only current members may admit; the linearizer should not
            // have handed us this op.
            return false;
        }
        if self.admitted.contains(&writer) {
            // Re-admission of a removed writer is not a thing; removal
            // is final for that key.
            return false;
        }
        self.admitted.push(writer);
        true
    }

    /// Apply a linearized `remove-writer{writer}`. Honored only when
    /// self-authored. Returns true when the set shrank.
    pub fn apply_remove(&mut self, author: &PubKey, writer: PubKey) -> bool {
        if *author != writer {
            return false;
        }
        if !self.contains(&writer) {
            return false;
        }
        self.removed.insert(writer);
        true
    }

    /// Whether `key` is currently an admitted, unremoved writer.
    pub fn contains(&self, key: &PubKey) -> bool {
        !self.removed.contains(key) && self.admitted.contains(key)
    }

    /// Active writers in admission order.
    pub fn active(&self) -> Vec<PubKey> {
        self.admitted
            .iter()
            .filter(|key| !self.removed.contains(key))
            .copied()
            .collect()
    }

    /// Admission-ordered list including removed writers (for persistence).
    pub fn admitted(&self) -> &[PubKey] {
        &self.admitted
    }

    /// Removed writers (unordered snapshot for persistence).
    pub fn removed(&self) -> Vec<PubKey> {
        let mut keys: Vec<PubKey> = self.removed.iter().copied().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8) -> PubKey {
        PubKey([tag; 32])
    }

    #[test]
    fn bootstrap_is_member_from_genesis() {
        let set = WriterSet::new(key(1));
        assert!(set.contains(&key(1)));
        assert!(!set.contains(&key(2)));
    }

    #[test]
    fn member_admits_newcomer() {
        let mut set = WriterSet::new(key(1));
        assert!(set.apply_add(&key(1), key(2)));
        assert!(set.contains(&key(2)));
        // Second admission is a no-op.
        assert!(!set.apply_add(&key(1), key(2)));
    }

    #[test]
    fn non_member_cannot_admit() {
        let mut set = WriterSet::new(key(1));
        assert!(!set.apply_add(&key(9), key(2)));
        assert!(!set.contains(&key(2)));
    }

    #[test]
    fn removal_must_be_self_authored() {
        let mut set = WriterSet::new(key(1));
        set.apply_add(&key(1), key(2));

        assert!(!set.apply_remove(&key(1), key(2)));
        assert!(set.contains(&key(2)));

        assert!(set.apply_remove(&key(2), key(2)));
        assert!(!set.contains(&key(2)));
    }

    #[test]
    fn removed_writer_stays_removed() {
        let mut set = WriterSet::new(key(1));
        set.apply_add(&key(1), key(2));
        set.apply_remove(&key(2), key(2));

        // Not even a member's add brings the key back.
        assert!(!set.apply_add(&key(1), key(2)));
        assert!(!set.contains(&key(2)));
    }

    #[test]
    fn round_trips_through_parts() {
        let mut set = WriterSet::new(key(1));
        set.apply_add(&key(1), key(2));
        set.apply_add(&key(2), key(3));
        set.apply_remove(&key(2), key(2));

        let rebuilt = WriterSet::from_parts(set.admitted().to_vec(), set.removed());
        assert_eq!(rebuilt.active(), vec![key(1), key(3)]);
        assert!(!rebuilt.contains(&key(2)));
    }
}
