//! Daemon state - the set of open sync engines

use crate::protocol::{Request, Response, WorkspaceInfo};
use pearsync_engine::{EngineOptions, SyncEngine};
use pearsync_model::{AppPaths, PubKey, WriterIdentity};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Long-lived daemon state: one engine per watched directory.
pub struct Daemon {
    paths: AppPaths,
    engines: Mutex<HashMap<PathBuf, Arc<SyncEngine>>>,
    start: Instant,
    /// Set by a shutdown request; the accept loop checks it.
    pub(crate) shutdown_requested: std::sync::atomic::AtomicBool,
}

impl Daemon {
    pub fn new(paths: AppPaths) -> Self {
        Self {
            paths,
            engines: Mutex::new(HashMap::new()),
            start: Instant::now(),
            shutdown_requested: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Handle one request. The daemon never crashes on a bad request;
    /// errors become `{error: …}` lines.
    pub async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Status => {
                let engines = self.engines.lock().await;
                Response::Success {
                    success: true,
                    note: Some(format!("{} workspace(s) watched", engines.len())),
                    key: None,
                    uptime_secs: Some(self.start.elapsed().as_secs()),
                    workspaces: None,
                }
            }
            Request::Watch {
                workspace,
                key,
                sync_deletes,
            } => self.watch(workspace, key, sync_deletes).await,
            Request::Unwatch { workspace } => self.unwatch(&workspace).await,
            Request::List => self.list().await,
            Request::Shutdown => {
                self.shutdown_requested
                    .store(true, std::sync::atomic::Ordering::SeqCst);
                Response::with_note("shutting down")
            }
        }
    }

    async fn watch(
        &self,
        workspace: PathBuf,
        key: Option<String>,
        sync_deletes: bool,
    ) -> Response {
        let dir = match workspace.canonicalize() {
            Ok(dir) => dir,
            Err(e) => return Response::error(format!("{}: {}", workspace.display(), e)),
        };
        if !dir.is_dir() {
            return Response::error(format!("{} is not a directory", dir.display()));
        }

        {
            let engines = self.engines.lock().await;
            if let Some(engine) = engines.get(&dir) {
                return Response::Success {
                    success: true,
                    note: Some("Already watching".into()),
                    key: Some(engine.workspace_key().to_string()),
                    uptime_secs: None,
                    workspaces: None,
                };
            }
        }

        // A key joins an existing workspace; without one we mint a new
        // identity whose public key becomes the workspace key.
        let (workspace_key, store_dir) = match key {
            Some(hex_key) => match PubKey::from_hex(hex_key.trim()) {
                Ok(key) => (key, self.paths.store_dir(&key)),
                Err(e) => return Response::error(format!("invalid workspace key: {}", e)),
            },
            None => {
                let identity = WriterIdentity::generate();
                let key = identity.public_key();
                let store_dir = self.paths.store_dir(&key);
                if let Err(e) = identity.save(store_dir.join("identity.key")) {
                    return Response::error(format!("failed to save identity: {}", e));
                }
                (key, store_dir)
            }
        };

        let options = EngineOptions {
            dir: dir.clone(),
            store_dir,
            workspace: Some(workspace_key),
            sync_deletes,
            bootstrap_addrs: Vec::new(),
        };

        let engine = match SyncEngine::init(options).await {
            Ok(engine) => engine,
            Err(e) => return Response::error(format!("failed to open workspace: {}", e)),
        };
        if let Err(e) = engine.start_watching() {
            engine.close().await;
            return Response::error(format!("failed to start watcher: {}", e));
        }

        // First cycle in the background so the IPC reply is immediate.
        {
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.reconcile().await {
                    tracing::warn!(error = %e, "initial reconcile failed");
                }
            });
        }

        tracing::info!(
            dir = %dir.display(),
            key = %workspace_key.fmt_short(),
            "watching workspace"
        );
        self.engines.lock().await.insert(dir, engine);
        Response::with_key(workspace_key.to_string())
    }

    async fn unwatch(&self, workspace: &Path) -> Response {
        let dir = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());
        let engine = self.engines.lock().await.remove(&dir);
        match engine {
            Some(engine) => {
                engine.close().await;
                tracing::info!(dir = %dir.display(), "unwatched workspace");
                Response::ok()
            }
            None => Response::error(format!("not watching {}", dir.display())),
        }
    }

    async fn list(&self) -> Response {
        let engines = self.engines.lock().await;
        let mut workspaces = Vec::with_capacity(engines.len());
        for (path, engine) in engines.iter() {
            match engine.status().await {
                Ok(status) => workspaces.push(WorkspaceInfo {
                    path: path.clone(),
                    key: status.workspace.to_string(),
                    writable: status.writable,
                    version: status.version,
                    files: status.files,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "status failed");
                }
            }
        }
        Response::Success {
            success: true,
            note: None,
            key: None,
            uptime_secs: None,
            workspaces: Some(workspaces),
        }
    }

    /// Close every engine (on shutdown).
    pub async fn close_all(&self) {
        let engines: Vec<_> = {
            let mut map = self.engines.lock().await;
            map.drain().collect()
        };
        for (path, engine) in engines {
            tracing::debug!(dir = %path.display(), "closing engine");
            engine.close().await;
        }
    }
}
