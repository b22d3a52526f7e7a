//! WorkspaceHandle - async facade over the workspace actor

use crate::actor::{StateEvent, WorkspaceCmd, WorkspaceError};
use crate::linearizer::AdvanceSummary;
use pearsync_log::{Block, SyncState};
use pearsync_model::{FileMeta, PubKey};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Cloneable handle to a `WorkspaceActor`.
///
/// All methods are async; the actor thread serializes the actual work.
#[derive(Clone)]
pub struct WorkspaceHandle {
    tx: mpsc::Sender<WorkspaceCmd>,
    events: broadcast::Sender<StateEvent>,
}

impl WorkspaceHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<WorkspaceCmd>,
        events: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self { tx, events }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WorkspaceCmd,
    ) -> Result<T, WorkspaceError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(make(resp))
            .await
            .map_err(|_| WorkspaceError::ActorGone)?;
        rx.await.map_err(|_| WorkspaceError::ActorGone)
    }

    /// Subscribe to state events (appends, applies, membership).
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Append an operation payload to the local log.
    pub async fn append(&self, payload: Vec<u8>) -> Result<Block, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::Append { payload, resp })
            .await?
    }

    /// Ingest a replicated block for a writer's log. Returns how many
    /// blocks became readable.
    pub async fn ingest(
        &self,
        writer: PubKey,
        block: Block,
        from: Option<PubKey>,
    ) -> Result<usize, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::Ingest {
            writer,
            block,
            from,
            resp,
        })
        .await?
    }

    /// Per-writer readable lengths, for replication summaries.
    pub async fn sync_state(&self) -> Result<SyncState, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::SyncState { resp }).await
    }

    /// Readable blocks of a writer in `[from_seq, to_seq]`.
    pub async fn range(
        &self,
        writer: PubKey,
        from_seq: u64,
        to_seq: u64,
    ) -> Result<Vec<Block>, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::Range {
            writer,
            from_seq,
            to_seq,
            resp,
        })
        .await?
    }

    /// A single readable block, if present locally.
    pub async fn get_block(
        &self,
        writer: PubKey,
        seq: u64,
    ) -> Result<Option<Block>, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::GetBlock { writer, seq, resp })
            .await?
    }

    /// Manifest lookup.
    pub async fn get(&self, path: impl Into<String>) -> Result<Option<FileMeta>, WorkspaceError> {
        let path = path.into();
        self.request(|resp| WorkspaceCmd::ViewGet { path, resp })
            .await?
    }

    /// Full manifest scan, ordered by path.
    pub async fn scan(&self) -> Result<Vec<(String, FileMeta)>, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::ViewScan { resp }).await?
    }

    /// Current view version.
    pub async fn version(&self) -> Result<u64, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::Version { resp }).await?
    }

    /// Whether the local writer is currently in the writer set.
    pub async fn writable(&self) -> Result<bool, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::Writable { resp }).await
    }

    /// Active writer keys.
    pub async fn writers(&self) -> Result<Vec<PubKey>, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::Writers { resp }).await
    }

    /// Linearize anything newly readable.
    pub async fn advance(&self) -> Result<AdvanceSummary, WorkspaceError> {
        self.request(|resp| WorkspaceCmd::Advance { resp }).await?
    }

    /// Stop the actor thread. Further calls fail with `ActorGone`.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WorkspaceCmd::Shutdown).await;
    }
}

impl std::fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::WorkspaceActor;
    use pearsync_model::{Operation, WriterIdentity};
    use pearsync_proto::encode_operation;

    fn put_payload(path: &str, content: &[u8], author: PubKey) -> Vec<u8> {
        encode_operation(Operation::Put {
            path: path.to_string(),
            meta: pearsync_model::FileMeta::new(content.to_vec(), 1_000, 0o644, author),
        })
    }

    #[tokio::test]
    async fn append_then_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let creator = WriterIdentity::generate();
        let key = creator.public_key();

        let handle = WorkspaceActor::spawn(tmp.path(), creator, key).unwrap();

        assert!(handle.writable().await.unwrap());
        handle
            .append(put_payload("hello.txt", b"Hello from A!", key))
            .await
            .unwrap();

        let meta = handle.get("hello.txt").await.unwrap().unwrap();
        assert_eq!(meta.content, b"Hello from A!");
        assert_eq!(handle.version().await.unwrap(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn joiner_is_not_writable_until_admitted() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let creator = WriterIdentity::generate();
        let joiner = WriterIdentity::generate();
        let workspace = creator.public_key();

        let a = WorkspaceActor::spawn(tmp_a.path(), creator, workspace).unwrap();
        let b = WorkspaceActor::spawn(tmp_b.path(), joiner.clone(), workspace).unwrap();

        assert!(!b.writable().await.unwrap());

        // The bootstrap admits the joiner; the block replicates to b.
        let block = a
            .append(encode_operation(Operation::AddWriter {
                writer: joiner.public_key(),
            }))
            .await
            .unwrap();
        b.ingest(workspace, block, None).await.unwrap();

        assert!(b.writable().await.unwrap());

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn ingest_replicates_manifest() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let creator = WriterIdentity::generate();
        let observer = WriterIdentity::generate();
        let workspace = creator.public_key();

        let a = WorkspaceActor::spawn(tmp_a.path(), creator, workspace).unwrap();
        let b = WorkspaceActor::spawn(tmp_b.path(), observer, workspace).unwrap();

        a.append(put_payload("x.txt", b"1", workspace)).await.unwrap();
        a.append(put_payload("y.txt", b"2", workspace)).await.unwrap();

        let state = a.sync_state().await.unwrap();
        assert_eq!(state.get(&workspace), 2);

        for block in a.range(workspace, 1, 2).await.unwrap() {
            b.ingest(workspace, block, None).await.unwrap();
        }

        let scan = b.scan().await.unwrap();
        assert_eq!(scan.len(), 2);
        assert_eq!(b.version().await.unwrap(), a.version().await.unwrap());

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn events_announce_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let creator = WriterIdentity::generate();
        let key = creator.public_key();

        let handle = WorkspaceActor::spawn(tmp.path(), creator, key).unwrap();
        let mut events = handle.subscribe();

        handle.append(put_payload("a", b"1", key)).await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            StateEvent::Appended { writer, seq: 1 } if writer == key
        ));

        handle.shutdown().await;
    }
}
