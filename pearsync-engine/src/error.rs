//! Error types for the sync engine

use pearsync_model::types::KeyParseError;
use pearsync_model::IdentityError;
use pearsync_net::NetError;
use pearsync_state::WorkspaceError;
use thiserror::Error;

/// Errors from engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid workspace key: {0}")]
    InvalidKey(#[from] KeyParseError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not writable: this node is outside the writer set")]
    NotWritable,

    #[error("writer admission timed out")]
    WriterAdmissionTimeout,

    #[error("watch error: {0}")]
    Watch(String),

    #[error("{0} is not a directory")]
    NotADirectory(String),
}
