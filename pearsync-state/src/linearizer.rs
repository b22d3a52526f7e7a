//! Linearizer - deterministic total order over the writer logs
//!
//! Maintains a frontier (last applied seq per admitted writer). Each
//! round drains at most one readable block per active writer, in
//! writer-key-lexicographic order, and applies the round as one atomic
//! View batch. A membership change ends the round so the candidate set
//! is recomputed before anything else applies.
//!
//! The order batches are handed to the View IS the total order:
//! conflict resolution is last-writer-wins at op granularity, decided
//! entirely here. Two peers linearizing the same block sets from the
//! same frontier walk identical rounds and end with byte-identical
//! Views.

use crate::view::{ApplyItem, View, ViewError};
use crate::writers::WriterSet;
use pearsync_log::{LogSet, StoreError};
use pearsync_model::{Operation, PubKey};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from linearization
#[derive(Debug, Error)]
pub enum LinearizerError {
    #[error("view error: {0}")]
    View(#[from] ViewError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("log gap: block {seq} of writer {writer} vanished")]
    MissingBlock { writer: String, seq: u64 },
}

/// What one `advance` call accomplished.
#[derive(Debug, Default, Clone)]
pub struct AdvanceSummary {
    /// Ops folded into the view (malformed ones count too; they only
    /// advance the frontier).
    pub applied: usize,
    /// Writers admitted during this advance.
    pub admitted: Vec<PubKey>,
    /// Writers removed during this advance.
    pub removed: Vec<PubKey>,
    /// View version after the last batch.
    pub version: u64,
}

impl AdvanceSummary {
    pub fn membership_changed(&self) -> bool {
        !self.admitted.is_empty() || !self.removed.is_empty()
    }
}

/// Folds readable blocks from a `LogSet` into a `View`.
pub struct Linearizer {
    view: View,
    writers: WriterSet,
    /// Last applied seq per writer. Removed writers stay here, frozen.
    applied: BTreeMap<PubKey, u64>,
}

impl Linearizer {
    /// Recover from the persisted view state, or start fresh with the
    /// bootstrap writer as the only member.
    pub fn open(view: View, bootstrap: PubKey) -> Result<Self, LinearizerError> {
        let (admitted, removed) = view.writer_sets()?;
        let writers = if admitted.is_empty() {
            WriterSet::new(bootstrap)
        } else {
            WriterSet::from_parts(admitted, removed)
        };
        let applied = view.frontier()?;

        Ok(Self {
            view,
            writers,
            applied,
        })
    }

    /// The manifest this linearizer materializes into.
    pub fn view(&self) -> &View {
        &self.view
    }

    /// Current writer membership.
    pub fn writers(&self) -> &WriterSet {
        &self.writers
    }

    /// Whether `key` may currently append.
    pub fn is_writable(&self, key: &PubKey) -> bool {
        self.writers.contains(key)
    }

    /// View version (count of applied state-mutating ops).
    pub fn version(&self) -> Result<u64, LinearizerError> {
        Ok(self.view.version()?)
    }

    fn applied_seq(&self, writer: &PubKey) -> u64 {
        self.applied.get(writer).copied().unwrap_or(0)
    }

    /// Drain every readable block the frontier allows, applying batches
    /// until no active writer has anything new.
    ///
    /// Opens a `BlockStore` for writers admitted along the way, so their
    /// logs replicate on the next peer sync.
    pub fn advance(&mut self, logs: &mut LogSet) -> Result<AdvanceSummary, LinearizerError> {
        let mut summary = AdvanceSummary::default();
        summary.version = self.view.version()?;

        loop {
            // Active writers with their next block readable, in
            // writer-key-lexicographic order (BTreeMap iteration order
            // of the sorted candidate keys).
            let mut candidates: Vec<PubKey> = self
                .writers
                .active()
                .into_iter()
                .filter(|writer| {
                    logs.get(writer)
                        .map(|store| store.length() > self.applied_seq(writer))
                        .unwrap_or(false)
                })
                .collect();
            candidates.sort();

            if candidates.is_empty() {
                break;
            }

            let mut batch: Vec<ApplyItem> = Vec::new();
            let mut membership_dirty = false;

            for writer in candidates {
                // Membership may have changed earlier in this round.
                if !self.writers.contains(&writer) {
                    continue;
                }
                let seq = self.applied_seq(&writer) + 1;
                let block = logs
                    .get(&writer)
                    .and_then(|store| store.get(seq).transpose())
                    .transpose()?
                    .ok_or_else(|| LinearizerError::MissingBlock {
                        writer: writer.to_string(),
                        seq,
                    })?;

                let op = match pearsync_proto::decode_operation(&block.payload) {
                    Ok(op) => Some(op),
                    Err(e) => {
                        tracing::warn!(
                            writer = %writer.fmt_short(),
                            seq,
                            error = %e,
                            "malformed op payload, skipping"
                        );
                        None
                    }
                };

                // Fold membership effects immediately so later blocks in
                // this advance see the updated set.
                let op = match op {
                    Some(Operation::AddWriter { writer: subject }) => {
                        if self.writers.apply_add(&writer, subject) {
                            logs.get_or_create(subject)?;
                            self.applied.entry(subject).or_insert(0);
                            summary.admitted.push(subject);
                            membership_dirty = true;
                            Some(Operation::AddWriter { writer: subject })
                        } else {
                            None // no-op admission: frontier advances only
                        }
                    }
                    Some(Operation::RemoveWriter { writer: subject }) => {
                        if self.writers.apply_remove(&writer, subject) {
                            summary.removed.push(subject);
                            membership_dirty = true;
                            Some(Operation::RemoveWriter { writer: subject })
                        } else {
                            None
                        }
                    }
                    other => other,
                };

                self.applied.insert(writer, seq);
                batch.push(ApplyItem {
                    author: writer,
                    seq,
                    op,
                });
                summary.applied += 1;

                if membership_dirty {
                    // Candidate set is stale; close the round.
                    break;
                }
            }

            if batch.is_empty() {
                break;
            }

            summary.version = self.view.apply_batch(
                &batch,
                self.writers.admitted(),
                &self.writers.removed(),
            )?;
        }

        Ok(summary)
    }
}
