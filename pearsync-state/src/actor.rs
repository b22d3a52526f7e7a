//! WorkspaceActor - dedicated thread that owns LogSet + Linearizer + View
//!
//! redb is synchronous, so all state mutation runs on one blocking
//! thread fed by an mpsc command channel. Apply batches, view writes
//! and membership changes are strictly serialized here; replication
//! I/O funnels blocks in through `Ingest` commands.

use crate::linearizer::{AdvanceSummary, Linearizer, LinearizerError};
use crate::view::{View, ViewError};
use pearsync_log::{Block, LogSet, StoreError, SyncState};
use pearsync_model::{FileMeta, PubKey, WriterIdentity};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Errors surfaced through the workspace handle
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("view error: {0}")]
    View(#[from] ViewError),

    #[error("linearizer error: {0}")]
    Linearizer(#[from] LinearizerError),

    #[error("not writable: local key is outside the writer set")]
    NotWritable,

    #[error("workspace actor is gone")]
    ActorGone,

    #[error("log disk write failed, workspace must be reopened: {0}")]
    Fatal(String),
}

/// Events broadcast by the actor as state advances.
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// A locally-authored block was committed (announce it to peers).
    Appended { writer: PubKey, seq: u64 },
    /// Linearization advanced the view to this version.
    Applied { version: u64 },
    /// A writer was admitted by a linearized `add-writer`.
    WriterAdmitted { writer: PubKey },
    /// A writer removed itself.
    WriterRemoved { writer: PubKey },
}

/// Commands processed by the actor thread.
pub(crate) enum WorkspaceCmd {
    Append {
        payload: Vec<u8>,
        resp: oneshot::Sender<Result<Block, WorkspaceError>>,
    },
    Ingest {
        writer: PubKey,
        block: Block,
        from: Option<PubKey>,
        resp: oneshot::Sender<Result<usize, WorkspaceError>>,
    },
    SyncState {
        resp: oneshot::Sender<SyncState>,
    },
    Range {
        writer: PubKey,
        from_seq: u64,
        to_seq: u64,
        resp: oneshot::Sender<Result<Vec<Block>, WorkspaceError>>,
    },
    GetBlock {
        writer: PubKey,
        seq: u64,
        resp: oneshot::Sender<Result<Option<Block>, WorkspaceError>>,
    },
    ViewGet {
        path: String,
        resp: oneshot::Sender<Result<Option<FileMeta>, WorkspaceError>>,
    },
    ViewScan {
        resp: oneshot::Sender<Result<Vec<(String, FileMeta)>, WorkspaceError>>,
    },
    Version {
        resp: oneshot::Sender<Result<u64, WorkspaceError>>,
    },
    Writable {
        resp: oneshot::Sender<bool>,
    },
    Writers {
        resp: oneshot::Sender<Vec<PubKey>>,
    },
    Advance {
        resp: oneshot::Sender<Result<AdvanceSummary, WorkspaceError>>,
    },
    Shutdown,
}

/// Owns the workspace state on its own thread.
pub struct WorkspaceActor {
    identity: WriterIdentity,
    logs: LogSet,
    linearizer: Linearizer,
    rx: mpsc::Receiver<WorkspaceCmd>,
    events: broadcast::Sender<StateEvent>,
}

impl WorkspaceActor {
    /// Open the workspace state under `store_dir` and spawn the actor
    /// thread. Returns the async handle.
    pub fn spawn(
        store_dir: impl AsRef<Path>,
        identity: WriterIdentity,
        bootstrap: PubKey,
    ) -> Result<crate::handle::WorkspaceHandle, WorkspaceError> {
        let store_dir = store_dir.as_ref();
        let logs = LogSet::open(store_dir.join("logs"), bootstrap, identity.public_key())?;
        let view = View::open(store_dir.join("state"))?;
        let mut linearizer = Linearizer::open(view, bootstrap)?;

        let (tx, rx) = mpsc::channel(256);
        let (events, _) = broadcast::channel(256);

        let mut actor = {
            let mut logs = logs;
            // Fold anything already on disk before serving commands.
            linearizer.advance(&mut logs)?;
            Self {
                identity,
                logs,
                linearizer,
                rx,
                events: events.clone(),
            }
        };

        std::thread::Builder::new()
            .name("pearsync-workspace".into())
            .spawn(move || actor.run())
            .map_err(|e| WorkspaceError::Fatal(e.to_string()))?;

        Ok(crate::handle::WorkspaceHandle::new(tx, events))
    }

    /// Process commands until Shutdown or all handles dropped.
    fn run(&mut self) {
        while let Some(cmd) = self.rx.blocking_recv() {
            match cmd {
                WorkspaceCmd::Append { payload, resp } => {
                    let _ = resp.send(self.append(payload));
                }
                WorkspaceCmd::Ingest {
                    writer,
                    block,
                    from,
                    resp,
                } => {
                    let _ = resp.send(self.ingest(writer, block, from));
                }
                WorkspaceCmd::SyncState { resp } => {
                    let _ = resp.send(self.logs.sync_state());
                }
                WorkspaceCmd::Range {
                    writer,
                    from_seq,
                    to_seq,
                    resp,
                } => {
                    let result = match self.logs.get(&writer) {
                        Some(store) => store.range(from_seq, to_seq).map_err(Into::into),
                        None => Ok(Vec::new()),
                    };
                    let _ = resp.send(result);
                }
                WorkspaceCmd::GetBlock { writer, seq, resp } => {
                    let result = match self.logs.get(&writer) {
                        Some(store) => store.get(seq).map_err(Into::into),
                        None => Ok(None),
                    };
                    let _ = resp.send(result);
                }
                WorkspaceCmd::ViewGet { path, resp } => {
                    let _ = resp.send(
                        self.linearizer
                            .view()
                            .get(&path)
                            .map_err(Into::into),
                    );
                }
                WorkspaceCmd::ViewScan { resp } => {
                    let _ = resp.send(self.linearizer.view().scan().map_err(Into::into));
                }
                WorkspaceCmd::Version { resp } => {
                    let _ = resp.send(self.linearizer.version().map_err(Into::into));
                }
                WorkspaceCmd::Writable { resp } => {
                    let _ = resp.send(
                        self.linearizer
                            .is_writable(&self.identity.public_key()),
                    );
                }
                WorkspaceCmd::Writers { resp } => {
                    let _ = resp.send(self.linearizer.writers().active());
                }
                WorkspaceCmd::Advance { resp } => {
                    let _ = resp.send(self.advance());
                }
                WorkspaceCmd::Shutdown => break,
            }
        }
        tracing::debug!("workspace actor stopped");
    }

    fn append(&mut self, payload: Vec<u8>) -> Result<Block, WorkspaceError> {
        let local = self.identity.public_key();
        if !self.linearizer.is_writable(&local) {
            return Err(WorkspaceError::NotWritable);
        }

        let store = self.logs.local_store()?;
        let block = store
            .append(&self.identity, payload)
            .map_err(|e| match e {
                StoreError::Log(log_err) => WorkspaceError::Fatal(log_err.to_string()),
                other => WorkspaceError::Store(other),
            })?;

        let _ = self.events.send(StateEvent::Appended {
            writer: local,
            seq: block.seq,
        });

        // In-flight appends block until apply catches up.
        self.advance()?;
        Ok(block)
    }

    fn ingest(
        &mut self,
        writer: PubKey,
        block: Block,
        from: Option<PubKey>,
    ) -> Result<usize, WorkspaceError> {
        let store = self.logs.get_or_create(writer)?;
        let admitted = store.ingest(block, from)?;
        let count = admitted.len();
        if count > 0 {
            self.advance()?;
        }
        Ok(count)
    }

    fn advance(&mut self) -> Result<AdvanceSummary, WorkspaceError> {
        let before = self.linearizer.version()?;
        let summary = self.linearizer.advance(&mut self.logs)?;

        for writer in &summary.admitted {
            let _ = self.events.send(StateEvent::WriterAdmitted { writer: *writer });
        }
        for writer in &summary.removed {
            let _ = self.events.send(StateEvent::WriterRemoved { writer: *writer });
        }
        if summary.version != before {
            let _ = self.events.send(StateEvent::Applied {
                version: summary.version,
            });
        }
        Ok(summary)
    }
}
