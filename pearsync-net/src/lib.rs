//! Networking for pearsync
//!
//! Joins the workspace topic, replicates writer logs over direct QUIC
//! streams, and runs the writer-exchange side-protocol on every peer
//! channel. Peer discovery and hole punching belong to iroh; this crate
//! only drives its public API.

pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod replicate;
pub mod service;
pub mod topic;
pub mod wire;

pub use endpoint::{PearsyncEndpoint, PEARSYNC_ALPN};
pub use error::NetError;
pub use service::PearsyncNetwork;
pub use topic::topic_for_workspace;
pub use wire::{Frame, FrameCodec, FrameSink, FrameStream, WireError, WRITER_EXCHANGE_LABEL};
