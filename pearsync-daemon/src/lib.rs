//! pearsyncd - a per-user daemon hosting long-lived sync engines
//!
//! Accepts newline-delimited JSON commands over a Unix socket in the
//! config directory; each request gets exactly one response line.

pub mod daemon;
pub mod protocol;
pub mod server;

pub use daemon::Daemon;
pub use protocol::{Request, Response, WorkspaceInfo};
