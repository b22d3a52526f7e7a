//! Workspace operations and file metadata
//!
//! An `Operation` is the payload of exactly one log block. The manifest
//! is the fold of linearized operations.

use crate::types::{Hash, PubKey};

/// Metadata (plus embedded content) stored under a path in the manifest.
///
/// Content is embedded in the operation so a `put` is atomic over the
/// replication layer: block and content arrive and verify together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Full file content.
    pub content: Vec<u8>,
    /// Content length in bytes.
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub mtime_ms: u64,
    /// Unix permission bits.
    pub mode: u32,
    /// SHA-256 of `content`.
    pub hash: Hash,
    /// Public key of the writer that produced this version.
    pub author: PubKey,
}

impl FileMeta {
    /// Build metadata for content, computing size and digest.
    pub fn new(content: Vec<u8>, mtime_ms: u64, mode: u32, author: PubKey) -> Self {
        let size = content.len() as u64;
        let hash = crate::crypto::file_digest(&content);
        Self {
            content,
            size,
            mtime_ms,
            mode,
            hash,
            author,
        }
    }
}

/// The tagged union carried as a block payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Upsert a path.
    Put { path: String, meta: FileMeta },
    /// Remove a path.
    Del { path: String },
    /// Admit a new writer to the workspace.
    AddWriter { writer: PubKey },
    /// Revoke a writer. Only honored when authored by the subject itself.
    RemoveWriter { writer: PubKey },
}

impl Operation {
    /// The path this operation touches, if it is a file operation.
    pub fn path(&self) -> Option<&str> {
        match self {
            Operation::Put { path, .. } | Operation::Del { path } => Some(path),
            _ => None,
        }
    }

    /// True for membership (writer-set) operations.
    pub fn is_membership(&self) -> bool {
        matches!(
            self,
            Operation::AddWriter { .. } | Operation::RemoveWriter { .. }
        )
    }
}
