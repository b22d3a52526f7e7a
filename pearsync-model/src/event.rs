//! Typed events emitted by a sync engine
//!
//! A fixed enum delivered over a broadcast channel; observers subscribe
//! and filter. There is no dynamic event bus.

use crate::types::PubKey;

/// Events for engine observers (CLI foreground mode, daemon status).
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// A peer channel opened on the workspace topic.
    PeerConnected { peer: PubKey },
    /// A peer channel closed.
    PeerDisconnected { peer: PubKey },
    /// An `add-writer` op for this writer was applied somewhere.
    WriterAdmitted { writer: PubKey },
    /// The local writer became writable.
    Writable,
    /// A local change was pushed into the log.
    FilePushed { path: String, bytes: u64 },
    /// A remote version was written to disk.
    FilePulled { path: String, bytes: u64 },
    /// A file was removed locally by delete propagation.
    FileRemoved { path: String },
    /// A single file failed to sync; the cycle continues.
    FileError { path: String, error: String },
    /// A push cycle finished, with the number of ops appended.
    PushDone { ops: usize },
    /// A pull cycle finished, with the number of files touched.
    PullDone { files: usize },
    /// A peer sent a block that failed verification for a log.
    ReplicationRejected { peer: PubKey, writer: PubKey },
}
