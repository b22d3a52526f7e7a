//! SyncEngine - push/pull reconciliation plus watching
//!
//! One engine per watched workspace directory. Owns the workspace
//! actor handle and the network service; reconciliation is push (local
//! changes become log ops) then pull (manifest versions land on disk),
//! in that order within a cycle.

use crate::error::EngineError;
use crate::ignore::IgnoreList;
use crate::scan::{is_safe_rel_path, mtime_ms_of, scan_dir};
use notify::Watcher;
use pearsync_model::{crypto, FileMeta, Operation, PubKey, SyncEvent, WriterIdentity};
use pearsync_net::PearsyncNetwork;
use pearsync_state::{StateEvent, WorkspaceActor, WorkspaceError, WorkspaceHandle};
use pearsync_proto::encode_operation;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

/// Cross-platform filesystems have second-level mtime precision, so
/// timestamps within this window count as equal.
const MTIME_TOLERANCE_MS: u64 = 1000;

/// Quiet window the watcher waits for before pushing.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Interval of the version poll that triggers pulls.
const PULL_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How long a joiner waits to observe its own admission.
pub const WRITER_ADMISSION_TIMEOUT: Duration = Duration::from_secs(30);
const ADMISSION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a joiner waits for the first peer before pulling from an
/// empty workspace is declared a failure.
pub const PEER_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for opening a sync engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// The directory to synchronize.
    pub dir: PathBuf,
    /// Per-workspace store root (logs, view, identity).
    pub store_dir: PathBuf,
    /// Join this workspace; None creates a new one whose key is the
    /// local writer key.
    pub workspace: Option<PubKey>,
    /// Propagate deletions to local disk on pull.
    pub sync_deletes: bool,
    /// Out-of-band peer addresses to seed discovery with.
    pub bootstrap_addrs: Vec<iroh::EndpointAddr>,
}

/// A point-in-time engine summary, for `status`.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub workspace: PubKey,
    pub writable: bool,
    pub version: u64,
    pub files: usize,
}

#[derive(Default)]
struct PushGate {
    running: bool,
    pending: bool,
}

/// Bidirectional reconciliation between a directory and the manifest.
pub struct SyncEngine {
    dir: PathBuf,
    workspace: PubKey,
    local_writer: PubKey,
    sync_deletes: bool,
    handle: WorkspaceHandle,
    network: Arc<PearsyncNetwork>,
    ignore: IgnoreList,
    events: broadcast::Sender<SyncEvent>,
    push_gate: Mutex<PushGate>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    watcher: std::sync::Mutex<Option<notify::RecommendedWatcher>>,
    last_pulled_version: AtomicU64,
    closed: AtomicBool,
}

impl SyncEngine {
    /// Open the workspace state, join the topic, and install the
    /// writer exchange. Returns the running engine; call
    /// [`SyncEngine::start_watching`] to begin continuous sync.
    pub async fn init(options: EngineOptions) -> Result<Arc<Self>, EngineError> {
        if !options.dir.is_dir() {
            return Err(EngineError::NotADirectory(
                options.dir.display().to_string(),
            ));
        }

        let (identity, _is_new) =
            WriterIdentity::load_or_generate(options.store_dir.join("identity.key"))?;
        let workspace = options.workspace.unwrap_or_else(|| identity.public_key());

        let ignore = IgnoreList::load(&options.dir);
        let handle = WorkspaceActor::spawn(&options.store_dir, identity.clone(), workspace)?;
        let network = PearsyncNetwork::spawn(
            &identity,
            workspace,
            handle.clone(),
            options.bootstrap_addrs,
        )
        .await?;

        let (events, _) = broadcast::channel(256);

        let engine = Arc::new(Self {
            dir: options.dir,
            workspace,
            local_writer: identity.public_key(),
            sync_deletes: options.sync_deletes,
            handle,
            network,
            ignore,
            events,
            push_gate: Mutex::new(PushGate::default()),
            tasks: std::sync::Mutex::new(Vec::new()),
            watcher: std::sync::Mutex::new(None),
            last_pulled_version: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        engine.spawn_event_forwarders();

        tracing::info!(
            workspace = %workspace.fmt_short(),
            writer = %engine.local_writer.fmt_short(),
            dir = %engine.dir.display(),
            "engine initialized"
        );
        Ok(engine)
    }

    /// The 32-byte workspace key.
    pub fn workspace_key(&self) -> PubKey {
        self.workspace
    }

    /// This node's dialable address, for out-of-band bootstrap.
    pub fn addr(&self) -> iroh::EndpointAddr {
        self.network.addr()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether the local writer is currently admitted.
    pub async fn writable(&self) -> Result<bool, EngineError> {
        Ok(self.handle.writable().await?)
    }

    /// Engine summary for status reporting.
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        Ok(EngineStatus {
            workspace: self.workspace,
            writable: self.handle.writable().await?,
            version: self.handle.version().await?,
            files: self.handle.scan().await?.len(),
        })
    }

    /// Block until the first peer channel opens, or time out. A joiner
    /// with nothing on disk has nothing to pull until this resolves.
    pub async fn wait_for_peer(&self, deadline: Duration) -> Result<(), EngineError> {
        let mut events = self.events.subscribe();
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(SyncEvent::PeerConnected { .. }) => return true,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        };
        match tokio::time::timeout(deadline, wait).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(EngineError::Net(pearsync_net::NetError::Timeout)),
        }
    }

    /// Block until this node is admitted, or time out with
    /// `WriterAdmissionTimeout`.
    pub async fn wait_writable(&self, deadline: Duration) -> Result<(), EngineError> {
        let start = tokio::time::Instant::now();
        loop {
            if self.handle.writable().await? {
                return Ok(());
            }
            if start.elapsed() >= deadline {
                return Err(EngineError::WriterAdmissionTimeout);
            }
            tokio::time::sleep(ADMISSION_POLL_INTERVAL).await;
        }
    }

    /// Local → manifest: diff the directory against the view, append
    /// `put`s for changed files and `del`s for own removed entries.
    pub async fn push(&self) -> Result<usize, EngineError> {
        push_once(
            &self.handle,
            &self.dir,
            &self.ignore,
            self.local_writer,
            &self.events,
        )
        .await
    }

    /// Manifest → local: write newer remote versions, restore mode and
    /// mtime, optionally remove local files absent from the view.
    pub async fn pull(&self) -> Result<usize, EngineError> {
        let touched = pull_once(
            &self.handle,
            &self.dir,
            &self.ignore,
            self.sync_deletes,
            &self.events,
        )
        .await?;
        self.last_pulled_version
            .store(self.handle.version().await?, Ordering::Relaxed);
        Ok(touched)
    }

    /// One reconciliation cycle: push before reading the view.
    pub async fn reconcile(&self) -> Result<(), EngineError> {
        match self.push().await {
            Ok(_) | Err(EngineError::NotWritable) => {}
            Err(e) => return Err(e),
        }
        self.pull().await?;
        Ok(())
    }

    /// Coalescing push: at most one in flight, at most one queued.
    pub async fn request_push(self: &Arc<Self>) {
        {
            let mut gate = self.push_gate.lock().await;
            if gate.running {
                gate.pending = true;
                return;
            }
            gate.running = true;
        }
        loop {
            match self.push().await {
                Ok(_) => {}
                Err(EngineError::NotWritable) => {
                    tracing::debug!("push skipped: not writable yet");
                }
                Err(e) => tracing::warn!(error = %e, "push failed"),
            }
            let mut gate = self.push_gate.lock().await;
            if gate.pending {
                gate.pending = false;
            } else {
                gate.running = false;
                break;
            }
        }
    }

    /// Install the filesystem watcher and the pull poll.
    pub fn start_watching(self: &Arc<Self>) -> Result<(), EngineError> {
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| {
                let Ok(event) = result else { return };
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_)
                        | notify::EventKind::Modify(_)
                        | notify::EventKind::Remove(_)
                ) {
                    let _ = fs_tx.send(());
                }
            },
        )
        .map_err(|e| EngineError::Watch(e.to_string()))?;
        watcher
            .watch(&self.dir, notify::RecursiveMode::Recursive)
            .map_err(|e| EngineError::Watch(e.to_string()))?;
        *self.watcher.lock().expect("watcher lock") = Some(watcher);

        let mut tasks = self.tasks.lock().expect("tasks lock");
        tasks.push(tokio::spawn(Self::run_watch_loop(self.clone(), fs_rx)));
        tasks.push(tokio::spawn(Self::run_pull_poll(self.clone())));
        Ok(())
    }

    /// Debounced watcher loop: wait for a quiet window, then push.
    async fn run_watch_loop(engine: Arc<Self>, mut fs_rx: mpsc::UnboundedReceiver<()>) {
        while fs_rx.recv().await.is_some() {
            // Stability window: keep extending while events arrive.
            loop {
                match tokio::time::timeout(WATCH_DEBOUNCE, fs_rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => return,
                    Err(_) => break, // quiet
                }
            }
            if engine.closed.load(Ordering::Relaxed) {
                return;
            }
            engine.request_push().await;
        }
    }

    /// Version poll: fold replicated blocks and pull on advance.
    async fn run_pull_poll(engine: Arc<Self>) {
        let mut interval = tokio::time::interval(PULL_POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if engine.closed.load(Ordering::Relaxed) {
                return;
            }
            if let Err(e) = engine.handle.advance().await {
                tracing::warn!(error = %e, "advance failed");
                continue;
            }
            let version = match engine.handle.version().await {
                Ok(v) => v,
                Err(_) => return,
            };
            if version != engine.last_pulled_version.load(Ordering::Relaxed) {
                if let Err(e) = engine.reconcile().await {
                    tracing::warn!(error = %e, "reconcile failed");
                }
            }
        }
    }

    fn spawn_event_forwarders(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("tasks lock");

        // Network events (peer up/down, replication rejects).
        {
            let engine = self.clone();
            let mut net_events = self.network.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    match net_events.recv().await {
                        Ok(event) => {
                            let _ = engine.events.send(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        // State events (admission).
        {
            let engine = self.clone();
            let mut state_events = self.handle.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    match state_events.recv().await {
                        Ok(StateEvent::WriterAdmitted { writer }) => {
                            let _ = engine.events.send(SyncEvent::WriterAdmitted { writer });
                            if writer == engine.local_writer {
                                let _ = engine.events.send(SyncEvent::Writable);
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
    }

    /// Stop the watcher, leave the topic, close the log set.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(watcher) = self.watcher.lock().expect("watcher lock").take() {
            drop(watcher);
        }
        for task in self.tasks.lock().expect("tasks lock").drain(..) {
            task.abort();
        }
        self.network.leave().await;
        self.handle.shutdown().await;
        tracing::info!(workspace = %self.workspace.fmt_short(), "engine closed");
    }
}

/// One push pass. Free function so the reconciliation logic is
/// testable without a network stack.
pub(crate) async fn push_once(
    handle: &WorkspaceHandle,
    dir: &std::path::Path,
    ignore: &IgnoreList,
    local_writer: PubKey,
    events: &broadcast::Sender<SyncEvent>,
) -> Result<usize, EngineError> {
    if !handle.writable().await? {
        return Err(EngineError::NotWritable);
    }

    let files = scan_dir(dir, ignore)?;
    let mut local_paths: HashSet<String> = HashSet::with_capacity(files.len());
    let mut ops = 0usize;

    for file in &files {
        local_paths.insert(file.rel_path.clone());

        let entry = handle.get(file.rel_path.clone()).await?;

        // Fast path: same size and mtime within tolerance.
        if let Some(meta) = &entry {
            if meta.size == file.size && meta.mtime_ms.abs_diff(file.mtime_ms) < MTIME_TOLERANCE_MS
            {
                continue;
            }
        }

        // Slow path: read and compare digests.
        let content = match tokio::fs::read(&file.abs_path).await {
            Ok(content) => content,
            Err(e) => {
                let _ = events.send(SyncEvent::FileError {
                    path: file.rel_path.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        let digest = crypto::file_digest(&content);
        if let Some(meta) = &entry {
            if meta.hash == digest {
                continue;
            }
        }

        let bytes = content.len() as u64;
        let op = Operation::Put {
            path: file.rel_path.clone(),
            meta: FileMeta {
                size: bytes,
                mtime_ms: file.mtime_ms,
                mode: file.mode,
                hash: digest,
                author: local_writer,
                content,
            },
        };
        match handle.append(encode_operation(op)).await {
            Ok(_) => {
                let _ = events.send(SyncEvent::FilePushed {
                    path: file.rel_path.clone(),
                    bytes,
                });
                ops += 1;
            }
            Err(WorkspaceError::NotWritable) => return Err(EngineError::NotWritable),
            Err(e) => return Err(e.into()),
        }
    }

    // Deletions: only entries this writer authored. A joiner pushing
    // for the first time must not wipe everyone else's files.
    for (path, meta) in handle.scan().await? {
        if local_paths.contains(&path) || ignore.is_ignored(&path) {
            continue;
        }
        if meta.author != local_writer {
            continue;
        }
        handle
            .append(encode_operation(Operation::Del { path: path.clone() }))
            .await?;
        ops += 1;
    }

    let _ = events.send(SyncEvent::PushDone { ops });
    Ok(ops)
}

/// One pull pass.
pub(crate) async fn pull_once(
    handle: &WorkspaceHandle,
    dir: &std::path::Path,
    ignore: &IgnoreList,
    sync_deletes: bool,
    events: &broadcast::Sender<SyncEvent>,
) -> Result<usize, EngineError> {
    let entries = handle.scan().await?;
    let mut manifest_paths: HashSet<String> = HashSet::with_capacity(entries.len());
    let mut touched = 0usize;

    for (path, meta) in entries {
        if ignore.is_ignored(&path) {
            continue;
        }
        if !is_safe_rel_path(&path) {
            tracing::warn!(path = %path, "unsafe manifest path, skipping");
            continue;
        }
        manifest_paths.insert(path.clone());

        let abs = dir.join(&path);
        let needs_write = match tokio::fs::metadata(&abs).await {
            Ok(local) => meta.mtime_ms >= mtime_ms_of(&local) + MTIME_TOLERANCE_MS,
            Err(_) => true,
        };
        if !needs_write {
            continue;
        }

        if let Err(e) = write_file(&abs, &meta).await {
            let _ = events.send(SyncEvent::FileError {
                path: path.clone(),
                error: e.to_string(),
            });
            continue;
        }
        let _ = events.send(SyncEvent::FilePulled {
            path,
            bytes: meta.size,
        });
        touched += 1;
    }

    if sync_deletes {
        for file in scan_dir(dir, ignore)? {
            if manifest_paths.contains(&file.rel_path) {
                continue;
            }
            match tokio::fs::remove_file(&file.abs_path).await {
                Ok(()) => {
                    let _ = events.send(SyncEvent::FileRemoved {
                        path: file.rel_path,
                    });
                    touched += 1;
                }
                Err(e) => {
                    let _ = events.send(SyncEvent::FileError {
                        path: file.rel_path,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    let _ = events.send(SyncEvent::PullDone { files: touched });
    Ok(touched)
}

/// Write a manifest entry to disk, restoring mode and mtime.
async fn write_file(abs: &std::path::Path, meta: &FileMeta) -> std::io::Result<()> {
    if let Some(parent) = abs.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(abs, &meta.content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(abs, std::fs::Permissions::from_mode(meta.mode)).await?;
    }

    let mtime = filetime::FileTime::from_unix_time(
        (meta.mtime_ms / 1000) as i64,
        ((meta.mtime_ms % 1000) * 1_000_000) as u32,
    );
    filetime::set_file_mtime(abs, mtime)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pearsync_state::WorkspaceActor;

    struct Node {
        _tmp: tempfile::TempDir,
        dir: PathBuf,
        handle: WorkspaceHandle,
        writer: PubKey,
        ignore: IgnoreList,
        events: broadcast::Sender<SyncEvent>,
    }

    impl Node {
        fn spawn(identity: WriterIdentity, workspace: PubKey) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let dir = tmp.path().join("tree");
            std::fs::create_dir_all(&dir).unwrap();
            let writer = identity.public_key();
            let handle =
                WorkspaceActor::spawn(tmp.path().join("store"), identity, workspace).unwrap();
            let (events, _) = broadcast::channel(256);
            Self {
                _tmp: tmp,
                dir,
                handle,
                writer,
                ignore: IgnoreList::defaults(),
                events,
            }
        }

        fn reload_ignore(&mut self) {
            self.ignore = IgnoreList::load(&self.dir);
        }

        async fn push(&self) -> Result<usize, EngineError> {
            push_once(&self.handle, &self.dir, &self.ignore, self.writer, &self.events).await
        }

        async fn pull(&self, sync_deletes: bool) -> Result<usize, EngineError> {
            pull_once(&self.handle, &self.dir, &self.ignore, sync_deletes, &self.events).await
        }

        /// Copy every log this node has onto `other`, as replication would.
        async fn replicate_to(&self, other: &Node) {
            let state = self.handle.sync_state().await.unwrap();
            for (writer, length) in state.writers() {
                let blocks = self.handle.range(*writer, 1, length).await.unwrap();
                for block in blocks {
                    other.handle.ingest(*writer, block, None).await.unwrap();
                }
            }
        }
    }

    fn creator_pair() -> (Node, Node, WriterIdentity) {
        let creator = WriterIdentity::generate();
        let joiner = WriterIdentity::generate();
        let workspace = creator.public_key();
        let a = Node::spawn(creator.clone(), workspace);
        let b = Node::spawn(joiner.clone(), workspace);
        (a, b, joiner)
    }

    async fn admit(a: &Node, joiner: &WriterIdentity) {
        a.handle
            .append(encode_operation(Operation::AddWriter {
                writer: joiner.public_key(),
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn basic_write_through() {
        let (a, b, _joiner) = creator_pair();

        std::fs::write(a.dir.join("hello.txt"), b"Hello from A!").unwrap();
        assert_eq!(a.push().await.unwrap(), 1);

        a.replicate_to(&b).await;
        b.pull(false).await.unwrap();

        let content = std::fs::read(b.dir.join("hello.txt")).unwrap();
        assert_eq!(content, b"Hello from A!");
    }

    #[tokio::test]
    async fn push_is_idempotent() {
        let (a, _b, _joiner) = creator_pair();

        std::fs::write(a.dir.join("file.txt"), b"content").unwrap();
        assert_eq!(a.push().await.unwrap(), 1);
        // No filesystem change: the second push is a no-op.
        assert_eq!(a.push().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bidirectional_concurrent_writes() {
        let (a, b, joiner) = creator_pair();
        admit(&a, &joiner).await;
        a.replicate_to(&b).await;
        assert!(b.handle.writable().await.unwrap());

        std::fs::write(a.dir.join("from-a.txt"), b"A").unwrap();
        std::fs::write(b.dir.join("from-b.txt"), b"B").unwrap();
        a.push().await.unwrap();
        b.push().await.unwrap();

        a.replicate_to(&b).await;
        b.replicate_to(&a).await;
        a.pull(false).await.unwrap();
        b.pull(false).await.unwrap();

        for node in [&a, &b] {
            assert_eq!(std::fs::read(node.dir.join("from-a.txt")).unwrap(), b"A");
            assert_eq!(std::fs::read(node.dir.join("from-b.txt")).unwrap(), b"B");
        }
    }

    #[tokio::test]
    async fn delete_propagation() {
        let (a, b, _joiner) = creator_pair();

        std::fs::write(a.dir.join("x.txt"), b"x").unwrap();
        a.push().await.unwrap();
        a.replicate_to(&b).await;
        b.pull(true).await.unwrap();
        assert!(b.dir.join("x.txt").exists());

        std::fs::remove_file(a.dir.join("x.txt")).unwrap();
        a.push().await.unwrap();
        a.replicate_to(&b).await;
        b.pull(true).await.unwrap();
        assert!(!b.dir.join("x.txt").exists());
    }

    #[tokio::test]
    async fn joiner_push_does_not_delete_others_files() {
        let (a, b, joiner) = creator_pair();

        // A has files; B is admitted and replicates the manifest
        // before its tree has anything in it.
        std::fs::write(a.dir.join("precious.txt"), b"keep me").unwrap();
        a.push().await.unwrap();
        admit(&a, &joiner).await;
        a.replicate_to(&b).await;

        // B pushes an empty tree: no dels for files it never authored.
        assert_eq!(b.push().await.unwrap(), 0);
        b.replicate_to(&a).await;

        assert!(a.handle.get("precious.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn own_deletes_are_propagated_only_for_own_files() {
        let (a, b, joiner) = creator_pair();
        admit(&a, &joiner).await;
        a.replicate_to(&b).await;

        // Both write their own file; everything converges.
        std::fs::write(a.dir.join("a-file.txt"), b"a").unwrap();
        std::fs::write(b.dir.join("b-file.txt"), b"b").unwrap();
        a.push().await.unwrap();
        b.push().await.unwrap();
        a.replicate_to(&b).await;
        b.replicate_to(&a).await;
        a.pull(false).await.unwrap();
        b.pull(false).await.unwrap();

        // B deletes both locally and pushes: only b-file.txt is del-ed.
        std::fs::remove_file(b.dir.join("a-file.txt")).unwrap();
        std::fs::remove_file(b.dir.join("b-file.txt")).unwrap();
        b.push().await.unwrap();
        b.replicate_to(&a).await;

        assert!(a.handle.get("a-file.txt").await.unwrap().is_some());
        assert!(a.handle.get("b-file.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn late_joiner_first_pull_gets_everything() {
        let (a, b, _joiner) = creator_pair();

        for i in 0..5 {
            std::fs::write(a.dir.join(format!("f{}.txt", i)), format!("{}", i)).unwrap();
        }
        assert_eq!(a.push().await.unwrap(), 5);

        a.replicate_to(&b).await;
        assert_eq!(b.pull(false).await.unwrap(), 5);
        for i in 0..5 {
            assert!(b.dir.join(format!("f{}.txt", i)).exists());
        }
    }

    #[tokio::test]
    async fn empty_workspace_first_pull_is_noop() {
        let (a, b, _joiner) = creator_pair();
        a.replicate_to(&b).await;
        assert_eq!(b.pull(false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ignored_paths_cross_neither_direction() {
        let (a, b, _joiner) = creator_pair();

        std::fs::write(
            a.dir.join(crate::ignore::IGNORE_FILE),
            "*.log\nsecret/\n",
        )
        .unwrap();
        let mut a = a;
        a.reload_ignore();

        std::fs::write(a.dir.join("keep.txt"), b"keep").unwrap();
        std::fs::write(a.dir.join("debug.log"), b"noise").unwrap();
        std::fs::create_dir_all(a.dir.join("secret")).unwrap();
        std::fs::write(a.dir.join("secret/pw.txt"), b"hunter2").unwrap();

        a.push().await.unwrap();

        // Nothing ignored reaches the view.
        assert!(a.handle.get("keep.txt").await.unwrap().is_some());
        assert!(a.handle.get("debug.log").await.unwrap().is_none());
        assert!(a.handle.get("secret/pw.txt").await.unwrap().is_none());

        a.replicate_to(&b).await;
        b.pull(false).await.unwrap();
        assert!(b.dir.join("keep.txt").exists());
        assert!(!b.dir.join("debug.log").exists());
        assert!(!b.dir.join("secret").exists());
    }

    #[tokio::test]
    async fn pull_restores_mode_and_mtime() {
        let (a, b, _joiner) = creator_pair();

        let src = a.dir.join("script.sh");
        std::fs::write(&src, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&src, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        a.push().await.unwrap();
        let meta = a.handle.get("script.sh").await.unwrap().unwrap();

        a.replicate_to(&b).await;
        b.pull(false).await.unwrap();

        let dst = b.dir.join("script.sh");
        let local = std::fs::metadata(&dst).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(local.permissions().mode() & 0o777, 0o755);
        }
        let local_mtime = mtime_ms_of(&local);
        assert!(local_mtime.abs_diff(meta.mtime_ms) < MTIME_TOLERANCE_MS);
    }

    #[tokio::test]
    async fn pull_skips_older_remote_versions() {
        let (a, b, joiner) = creator_pair();
        admit(&a, &joiner).await;
        a.replicate_to(&b).await;

        // Same path on both; B's copy is much newer on disk.
        std::fs::write(a.dir.join("doc.txt"), b"old").unwrap();
        a.push().await.unwrap();

        std::fs::write(b.dir.join("doc.txt"), b"newer local").unwrap();
        let future = filetime::FileTime::from_unix_time(4_102_444_800, 0); // 2100
        filetime::set_file_mtime(b.dir.join("doc.txt"), future).unwrap();

        a.replicate_to(&b).await;
        b.pull(false).await.unwrap();

        // Remote mtime does not exceed local: file untouched.
        assert_eq!(std::fs::read(b.dir.join("doc.txt")).unwrap(), b"newer local");
    }

    #[tokio::test]
    async fn unwritable_joiner_push_is_rejected() {
        let (_a, b, _joiner) = creator_pair();
        std::fs::write(b.dir.join("file.txt"), b"x").unwrap();
        assert!(matches!(b.push().await, Err(EngineError::NotWritable)));
    }
}
