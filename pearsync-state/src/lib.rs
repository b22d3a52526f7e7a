//! Manifest state for a workspace
//!
//! The `View` is the materialized path → FileMeta mapping, the
//! `WriterSet` tracks admitted writer keys, and the `Linearizer` folds
//! the partially ordered logs into both, deterministically.

pub mod actor;
pub mod handle;
pub mod linearizer;
pub mod view;
pub mod writers;

pub use actor::{StateEvent, WorkspaceActor, WorkspaceError};
pub use handle::WorkspaceHandle;
pub use linearizer::{AdvanceSummary, Linearizer, LinearizerError};
pub use view::{ApplyItem, View, ViewError};
pub use writers::WriterSet;
