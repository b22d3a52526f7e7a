//! Error types for the network layer

use pearsync_state::WorkspaceError;
use thiserror::Error;

/// Errors from transport, replication and exchange
#[derive(Error, Debug)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] crate::wire::WireError),

    #[error("endpoint error: {0}")]
    Endpoint(String),

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("gossip error: {0}")]
    Gossip(String),

    #[error("sync protocol error: {0}")]
    Sync(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("protocol timeout")]
    Timeout,

    #[error("block {seq} of writer {writer} not available from any peer")]
    NotAvailable { writer: String, seq: u64 },
}
