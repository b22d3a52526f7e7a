//! Sync engine for pearsync
//!
//! Reconciles a local directory against the replicated manifest: local
//! changes become log operations (push), remote versions land on disk
//! (pull), and a filesystem watcher plus a version poll keep both
//! directions flowing.

pub mod error;
pub mod ignore;
pub mod scan;
pub mod sync;

pub use error::EngineError;
pub use ignore::IgnoreList;
pub use scan::{scan_dir, LocalFile};
pub use sync::{EngineOptions, EngineStatus, SyncEngine};
