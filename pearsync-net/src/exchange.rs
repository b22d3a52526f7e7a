//! Writer exchange - the admission side-protocol
//!
//! One sub-channel per peer connection, labeled
//! `pearsync-writer-exchange` plus the workspace topic. Each side sends
//! exactly one message: its local writer key. A writable receiver that
//! sees an unknown key appends `add-writer` for it; everyone else just
//! learns the key. Advisory only - losing this channel merely delays
//! admission, the membership invariants live in the linearized log.

use crate::error::NetError;
use crate::wire::{Frame, FrameSink, FrameStream};
use pearsync_model::PubKey;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

async fn recv_frame<R: AsyncRead + Send + Unpin>(
    stream: &mut FrameStream<R>,
) -> Result<Frame, NetError> {
    tokio::time::timeout(EXCHANGE_TIMEOUT, stream.recv())
        .await
        .map_err(|_| NetError::Timeout)?
        .map_err(NetError::Wire)?
        .ok_or_else(|| NetError::Sync("exchange stream closed".into()))
}

/// Initiator side: open the sub-channel, send our key, read theirs.
pub async fn run_initiator<W, R>(
    topic: [u8; 32],
    local_writer: PubKey,
    sink: &mut FrameSink<W>,
    stream: &mut FrameStream<R>,
) -> Result<PubKey, NetError>
where
    W: AsyncWrite + Send + Unpin,
    R: AsyncRead + Send + Unpin,
{
    sink.send(Frame::ExchangeHello { topic }).await?;
    sink.send(Frame::WriterKey {
        writer: local_writer,
    })
    .await?;

    match recv_frame(stream).await? {
        Frame::WriterKey { writer } => Ok(writer),
        other => Err(NetError::Sync(format!(
            "expected WriterKey, got {:?}",
            other
        ))),
    }
}

/// Responder side: the dispatcher already consumed the hello and
/// verified the topic; read their key, answer with ours.
pub async fn run_responder<W, R>(
    local_writer: PubKey,
    sink: &mut FrameSink<W>,
    stream: &mut FrameStream<R>,
) -> Result<PubKey, NetError>
where
    W: AsyncWrite + Send + Unpin,
    R: AsyncRead + Send + Unpin,
{
    let remote = match recv_frame(stream).await? {
        Frame::WriterKey { writer } => writer,
        other => {
            return Err(NetError::Sync(format!(
                "expected WriterKey, got {:?}",
                other
            )))
        }
    };

    sink.send(Frame::WriterKey {
        writer: local_writer,
    })
    .await?;

    Ok(remote)
}
