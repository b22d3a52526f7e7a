//! Per-log replication session
//!
//! Symmetric, half-duplex, one log per stream. The initiator opens the
//! stream and names the log; both sides exchange length summaries, then
//! each side requests and receives the range it is missing:
//!
//! ```text
//! initiator: OpenLog, Summary ──▶
//!            ◀── Summary
//!            Request | Done ──▶
//!            ◀── Block*, Done        (if requested)
//!            ◀── Request | Done
//!            Block*, Done ──▶        (if requested)
//! ```
//!
//! Every received block verifies against the writer key and the prior
//! chain hash before it is admitted; a bad block poisons only this
//! (peer, log) pair, not the channel.

use crate::error::NetError;
use crate::wire::{Frame, FrameSink, FrameStream};
use pearsync_model::PubKey;
use pearsync_state::WorkspaceHandle;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

const PROTOCOL_TIMEOUT: Duration = Duration::from_secs(15);

/// Blocks fetched from the store per streaming chunk.
const CHUNK: u64 = 32;

/// Result of one per-log session
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncOutcome {
    pub blocks_received: u64,
    pub blocks_sent: u64,
}

impl SyncOutcome {
    pub fn merge(&mut self, other: SyncOutcome) {
        self.blocks_received += other.blocks_received;
        self.blocks_sent += other.blocks_sent;
    }
}

async fn recv_frame<R: AsyncRead + Send + Unpin>(
    stream: &mut FrameStream<R>,
) -> Result<Frame, NetError> {
    tokio::time::timeout(PROTOCOL_TIMEOUT, stream.recv())
        .await
        .map_err(|_| NetError::Timeout)?
        .map_err(NetError::Wire)?
        .ok_or_else(|| NetError::Sync("stream closed mid-session".into()))
}

/// Run the initiator half for one log.
pub async fn run_initiator<W, R>(
    handle: &WorkspaceHandle,
    writer: PubKey,
    peer: PubKey,
    sink: &mut FrameSink<W>,
    stream: &mut FrameStream<R>,
) -> Result<SyncOutcome, NetError>
where
    W: AsyncWrite + Send + Unpin,
    R: AsyncRead + Send + Unpin,
{
    let my_len = handle.sync_state().await?.get(&writer);
    sink.send(Frame::OpenLog { writer }).await?;
    sink.send(Frame::Summary { length: my_len }).await?;

    let their_len = match recv_frame(stream).await? {
        Frame::Summary { length } => length,
        other => {
            return Err(NetError::Sync(format!(
                "expected Summary, got {:?}",
                other
            )))
        }
    };

    let mut outcome = SyncOutcome::default();

    // Pull what we are missing.
    if their_len > my_len {
        sink.send(Frame::Request {
            from_seq: my_len + 1,
            to_seq: their_len,
        })
        .await?;
        outcome.blocks_received = recv_blocks(handle, writer, peer, stream).await?;
    } else {
        sink.send(Frame::Done).await?;
    }

    // Serve what they are missing.
    match recv_frame(stream).await? {
        Frame::Request { from_seq, to_seq } => {
            outcome.blocks_sent = send_blocks(handle, writer, from_seq, to_seq, sink).await?;
        }
        Frame::Done => {}
        other => {
            return Err(NetError::Sync(format!(
                "expected Request or Done, got {:?}",
                other
            )))
        }
    }

    Ok(outcome)
}

/// Run the responder half for one log. The caller already consumed the
/// OpenLog frame that named `writer`.
pub async fn run_responder<W, R>(
    handle: &WorkspaceHandle,
    writer: PubKey,
    peer: PubKey,
    sink: &mut FrameSink<W>,
    stream: &mut FrameStream<R>,
) -> Result<SyncOutcome, NetError>
where
    W: AsyncWrite + Send + Unpin,
    R: AsyncRead + Send + Unpin,
{
    let their_len = match recv_frame(stream).await? {
        Frame::Summary { length } => length,
        other => {
            return Err(NetError::Sync(format!(
                "expected Summary, got {:?}",
                other
            )))
        }
    };

    let my_len = handle.sync_state().await?.get(&writer);
    sink.send(Frame::Summary { length: my_len }).await?;

    let mut outcome = SyncOutcome::default();

    // Serve their request first.
    match recv_frame(stream).await? {
        Frame::Request { from_seq, to_seq } => {
            outcome.blocks_sent = send_blocks(handle, writer, from_seq, to_seq, sink).await?;
        }
        Frame::Done => {}
        other => {
            return Err(NetError::Sync(format!(
                "expected Request or Done, got {:?}",
                other
            )))
        }
    }

    // Then pull our side.
    if their_len > my_len {
        sink.send(Frame::Request {
            from_seq: my_len + 1,
            to_seq: their_len,
        })
        .await?;
        outcome.blocks_received = recv_blocks(handle, writer, peer, stream).await?;
    } else {
        sink.send(Frame::Done).await?;
    }

    Ok(outcome)
}

async fn recv_blocks<R: AsyncRead + Send + Unpin>(
    handle: &WorkspaceHandle,
    writer: PubKey,
    peer: PubKey,
    stream: &mut FrameStream<R>,
) -> Result<u64, NetError> {
    let mut received = 0u64;
    loop {
        match recv_frame(stream).await? {
            Frame::Done => break,
            frame @ Frame::Block { .. } => {
                let block = frame.into_block().expect("matched Block");
                handle
                    .ingest(writer, block, Some(peer))
                    .await
                    .map_err(|e| {
                        NetError::Sync(format!(
                            "block from {} rejected for log {}: {}",
                            peer.fmt_short(),
                            writer.fmt_short(),
                            e
                        ))
                    })?;
                received += 1;
            }
            other => {
                return Err(NetError::Sync(format!(
                    "expected Block or Done, got {:?}",
                    other
                )))
            }
        }
    }
    Ok(received)
}

async fn send_blocks<W: AsyncWrite + Send + Unpin>(
    handle: &WorkspaceHandle,
    writer: PubKey,
    from_seq: u64,
    to_seq: u64,
    sink: &mut FrameSink<W>,
) -> Result<u64, NetError> {
    let mut sent = 0u64;
    let mut next = from_seq;
    // Fetch in chunks so a large range never sits in memory at once.
    while next <= to_seq {
        let chunk_end = to_seq.min(next + CHUNK - 1);
        let blocks = handle.range(writer, next, chunk_end).await?;
        if blocks.is_empty() {
            break; // peer asked past our tip; stop cleanly
        }
        next = blocks.last().map(|b| b.seq + 1).unwrap_or(to_seq + 1);
        for block in blocks {
            sink.send(Frame::from_block(block)).await?;
            sent += 1;
        }
    }
    sink.send(Frame::Done).await?;
    Ok(sent)
}
