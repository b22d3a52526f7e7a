//! Socket server and connection handling

use crate::daemon::Daemon;
use crate::protocol::{Request, Response, REQUEST_TIMEOUT};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out")]
    Timeout,
}

/// Bind the socket (removing a stale one), accept clients until a
/// shutdown request or signal, then close engines and unlink the socket.
pub async fn run(daemon: Arc<Daemon>) -> Result<(), ServerError> {
    daemon.paths().ensure_dirs()?;
    let socket_path = daemon.paths().socket_path();

    // A previous daemon may have died without cleanup.
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!(socket = %socket_path.display(), "daemon listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let daemon = daemon.clone();
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&daemon, stream).await {
                                tracing::debug!(error = %e, "client connection error");
                            }
                            if daemon
                                .shutdown_requested
                                .load(std::sync::atomic::Ordering::SeqCst)
                            {
                                let _ = shutdown_tx.send(()).await;
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("shutdown requested over IPC");
                break;
            }
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    daemon.close_all().await;
    drop(listener);
    let _ = std::fs::remove_file(&socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Serve one client: one JSON request per line, one response line each.
async fn handle_connection(daemon: &Daemon, stream: UnixStream) -> Result<(), ServerError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match tokio::time::timeout(REQUEST_TIMEOUT, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => break, // client closed
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ServerError::Timeout),
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                tracing::debug!(?request, "request");
                daemon.handle_request(request).await
            }
            Err(e) => Response::error(format!("invalid request: {}", e)),
        };

        let mut payload = serde_json::to_string(&response)
            .unwrap_or_else(|_| r#"{"error":"internal serialization failure"}"#.to_string());
        payload.push('\n');
        write_half.write_all(payload.as_bytes()).await?;

        if daemon
            .shutdown_requested
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            break;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("listen for Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pearsync_model::AppPaths;

    async fn send_line(socket: &std::path::Path, line: &str) -> String {
        let mut stream = UnixStream::connect(socket).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn status_watch_errors_and_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(tmp.path().join("cfg"), tmp.path().join("data"));
        let daemon = Arc::new(Daemon::new(paths.clone()));
        let socket = paths.socket_path();

        let server = tokio::spawn(run(daemon));

        // Wait for the socket to appear.
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let response = send_line(&socket, r#"{"command": "status"}"#).await;
        assert!(response.contains(r#""success":true"#));

        // Watch on a non-directory errors but the daemon stays alive.
        let response = send_line(
            &socket,
            r#"{"command": "watch", "workspace": "/definitely/not/a/dir"}"#,
        )
        .await;
        assert!(response.contains("error"));

        let response = send_line(&socket, r#"{"command": "list"}"#).await;
        assert!(response.contains(r#""workspaces":[]"#));

        // Garbage is answered, not fatal.
        let response = send_line(&socket, r#"{"what": "ever"}"#).await;
        assert!(response.contains("invalid request"));

        let response = send_line(&socket, r#"{"command": "shutdown"}"#).await;
        assert!(response.contains("shutting down"));

        server.await.unwrap().unwrap();
        assert!(!socket.exists(), "socket must be unlinked on shutdown");
    }

    #[tokio::test]
    async fn empty_lines_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(tmp.path().join("cfg"), tmp.path().join("data"));
        let daemon = Arc::new(Daemon::new(paths.clone()));
        let socket = paths.socket_path();

        let server = tokio::spawn(run(daemon));
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        stream.write_all(b"\n\n{\"command\": \"status\"}\n").await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response).await.unwrap();
        assert!(response.contains(r#""success":true"#));

        // Tear down via IPC so the socket file is removed.
        let _ = send_line(&socket, r#"{"command": "shutdown"}"#).await;
        let _ = server.await;
        let _ = std::fs::remove_file(&socket);
    }
}
