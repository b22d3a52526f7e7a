//! Daemon IPC protocol
//!
//! Newline-delimited UTF-8 JSON over a Unix socket. Requests are tagged
//! by `command`; every request gets exactly one response object:
//! `{"success": true, …}` or `{"error": "…"}`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How long the server waits for a request line.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A client command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Request {
    /// Daemon health and counters.
    Status,
    /// Start watching a directory. `key` joins an existing workspace;
    /// without it a new workspace is created and its key returned.
    Watch {
        workspace: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default)]
        sync_deletes: bool,
    },
    /// Stop watching a directory.
    Unwatch { workspace: PathBuf },
    /// Per-workspace details.
    List,
    /// Close every engine and exit.
    Shutdown,
}

/// Summary of one watched workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub path: PathBuf,
    pub key: String,
    pub writable: bool,
    pub version: u64,
    pub files: usize,
}

/// A response line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error {
        error: String,
    },
    Success {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uptime_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspaces: Option<Vec<WorkspaceInfo>>,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Success {
            success: true,
            note: None,
            key: None,
            uptime_secs: None,
            workspaces: None,
        }
    }

    pub fn with_note(note: impl Into<String>) -> Self {
        Response::Success {
            success: true,
            note: Some(note.into()),
            key: None,
            uptime_secs: None,
            workspaces: None,
        }
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Response::Success {
            success: true,
            note: None,
            key: Some(key.into()),
            uptime_secs: None,
            workspaces: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shapes() {
        let req: Request = serde_json::from_str(r#"{"command": "status"}"#).unwrap();
        assert!(matches!(req, Request::Status));

        let req: Request =
            serde_json::from_str(r#"{"command": "watch", "workspace": "/home/me/notes"}"#)
                .unwrap();
        match req {
            Request::Watch {
                workspace,
                key,
                sync_deletes,
            } => {
                assert_eq!(workspace, PathBuf::from("/home/me/notes"));
                assert!(key.is_none());
                assert!(!sync_deletes);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn response_wire_shapes() {
        let line = serde_json::to_string(&Response::ok()).unwrap();
        assert_eq!(line, r#"{"success":true}"#);

        let line = serde_json::to_string(&Response::error("bad request")).unwrap();
        assert_eq!(line, r#"{"error":"bad request"}"#);

        let line = serde_json::to_string(&Response::with_note("Already watching")).unwrap();
        assert!(line.contains("Already watching"));
    }

    #[test]
    fn unknown_command_fails_to_parse() {
        assert!(serde_json::from_str::<Request>(r#"{"command": "frobnicate"}"#).is_err());
    }
}
