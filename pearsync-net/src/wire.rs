//! Replication frame codec
//!
//! Every replication message is a length-prefixed frame:
//!
//! ```text
//! u32 frame_len | u8 msg_type | varint seq | u32 payload_len | payload
//! ```
//!
//! Block frames additionally carry a 64-byte Ed25519 signature tail
//! (the signature covers the chain position, not the frame). Control
//! frames reuse the same prefix with type-specific payloads:
//!
//! | type | frame          | seq        | payload                   |
//! |------|----------------|------------|---------------------------|
//! | 0x01 | OpenLog        | 0          | 32-byte writer key        |
//! | 0x02 | Summary        | log length | empty                     |
//! | 0x03 | Request        | from_seq   | 8-byte BE to_seq          |
//! | 0x04 | Block          | block seq  | op bytes, signature tail  |
//! | 0x05 | Done           | 0          | empty                     |
//! | 0x06 | ExchangeHello  | 0          | label ‖ 32-byte topic     |
//! | 0x07 | WriterKey      | 0          | 32-byte writer key        |
//!
//! Round-trip law: `encode(decode(bytes)) == bytes` for every frame this
//! codec emits (varints are minimal).

use bytes::{Buf, BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use pearsync_log::{Block, MAX_BLOCK_SIZE};
use pearsync_model::{PubKey, Signature};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

/// Sub-channel label for the writer-exchange protocol.
pub const WRITER_EXCHANGE_LABEL: &[u8] = b"pearsync-writer-exchange";

/// Frames larger than this are rejected outright.
const MAX_FRAME_SIZE: usize = MAX_BLOCK_SIZE + 1024;

const TYPE_OPEN_LOG: u8 = 0x01;
const TYPE_SUMMARY: u8 = 0x02;
const TYPE_REQUEST: u8 = 0x03;
const TYPE_BLOCK: u8 = 0x04;
const TYPE_DONE: u8 = 0x05;
const TYPE_EXCHANGE_HELLO: u8 = 0x06;
const TYPE_WRITER_KEY: u8 = 0x07;

/// Errors from frame encoding/decoding
#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("unknown frame type: {0:#04x}")]
    UnknownType(u8),

    #[error("malformed {frame} frame: {reason}")]
    Malformed {
        frame: &'static str,
        reason: &'static str,
    },

    #[error("varint overflow")]
    VarintOverflow,
}

/// A single replication frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Start replicating the given writer's log on this stream.
    OpenLog { writer: PubKey },
    /// The sender's readable length for the opened log.
    Summary { length: u64 },
    /// Ask for blocks in `[from_seq, to_seq]` inclusive.
    Request { from_seq: u64, to_seq: u64 },
    /// One block of the opened log.
    Block {
        seq: u64,
        payload: Vec<u8>,
        signature: Signature,
    },
    /// End of the current half-exchange.
    Done,
    /// Open the writer-exchange sub-channel for a workspace topic.
    ExchangeHello { topic: [u8; 32] },
    /// The sender's local writer key.
    WriterKey { writer: PubKey },
}

impl Frame {
    /// Wrap a log block for the wire.
    pub fn from_block(block: Block) -> Self {
        Frame::Block {
            seq: block.seq,
            payload: block.payload,
            signature: block.signature,
        }
    }

    /// Unwrap a Block frame into a log block.
    pub fn into_block(self) -> Option<Block> {
        match self {
            Frame::Block {
                seq,
                payload,
                signature,
            } => Some(Block {
                seq,
                payload,
                signature,
            }),
            _ => None,
        }
    }
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn get_varint(buf: &mut impl Buf) -> Result<u64, WireError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(WireError::Malformed {
                frame: "frame",
                reason: "truncated varint",
            });
        }
        let byte = buf.get_u8();
        if shift >= 64 {
            return Err(WireError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Encode a frame body (everything after the u32 length prefix).
fn encode_body(frame: &Frame) -> Vec<u8> {
    let (msg_type, seq, payload, signature): (u8, u64, Vec<u8>, Option<&Signature>) = match frame {
        Frame::OpenLog { writer } => (TYPE_OPEN_LOG, 0, writer.to_vec(), None),
        Frame::Summary { length } => (TYPE_SUMMARY, *length, Vec::new(), None),
        Frame::Request { from_seq, to_seq } => {
            (TYPE_REQUEST, *from_seq, to_seq.to_be_bytes().to_vec(), None)
        }
        Frame::Block {
            seq,
            payload,
            signature,
        } => (TYPE_BLOCK, *seq, payload.clone(), Some(signature)),
        Frame::Done => (TYPE_DONE, 0, Vec::new(), None),
        Frame::ExchangeHello { topic } => {
            let mut buf = WRITER_EXCHANGE_LABEL.to_vec();
            buf.extend_from_slice(topic);
            (TYPE_EXCHANGE_HELLO, 0, buf, None)
        }
        Frame::WriterKey { writer } => (TYPE_WRITER_KEY, 0, writer.to_vec(), None),
    };

    let mut body = Vec::with_capacity(1 + 10 + 4 + payload.len() + 64);
    body.push(msg_type);
    put_varint(&mut body, seq);
    body.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    body.extend_from_slice(&payload);
    if let Some(sig) = signature {
        body.extend_from_slice(sig.as_bytes());
    }
    body
}

fn decode_body(msg_type: u8, seq: u64, payload: Vec<u8>, rest: &[u8]) -> Result<Frame, WireError> {
    // Only Block frames carry trailing bytes (the signature).
    if msg_type != TYPE_BLOCK && !rest.is_empty() {
        return Err(WireError::Malformed {
            frame: "control",
            reason: "unexpected trailing bytes",
        });
    }

    match msg_type {
        TYPE_OPEN_LOG => {
            let writer = PubKey::try_from(payload).map_err(|_| WireError::Malformed {
                frame: "OpenLog",
                reason: "writer key must be 32 bytes",
            })?;
            Ok(Frame::OpenLog { writer })
        }
        TYPE_SUMMARY => {
            if !payload.is_empty() {
                return Err(WireError::Malformed {
                    frame: "Summary",
                    reason: "payload must be empty",
                });
            }
            Ok(Frame::Summary { length: seq })
        }
        TYPE_REQUEST => {
            let to: [u8; 8] = payload.as_slice().try_into().map_err(|_| {
                WireError::Malformed {
                    frame: "Request",
                    reason: "to_seq must be 8 bytes",
                }
            })?;
            Ok(Frame::Request {
                from_seq: seq,
                to_seq: u64::from_be_bytes(to),
            })
        }
        TYPE_BLOCK => {
            let signature: [u8; 64] = rest.try_into().map_err(|_| WireError::Malformed {
                frame: "Block",
                reason: "signature must be 64 bytes",
            })?;
            Ok(Frame::Block {
                seq,
                payload,
                signature: Signature::from(signature),
            })
        }
        TYPE_DONE => {
            if seq != 0 || !payload.is_empty() {
                return Err(WireError::Malformed {
                    frame: "Done",
                    reason: "must be empty",
                });
            }
            Ok(Frame::Done)
        }
        TYPE_EXCHANGE_HELLO => {
            let label_len = WRITER_EXCHANGE_LABEL.len();
            if payload.len() != label_len + 32 || &payload[..label_len] != WRITER_EXCHANGE_LABEL {
                return Err(WireError::Malformed {
                    frame: "ExchangeHello",
                    reason: "bad label or topic",
                });
            }
            let topic: [u8; 32] = payload[label_len..].try_into().expect("checked length");
            Ok(Frame::ExchangeHello { topic })
        }
        TYPE_WRITER_KEY => {
            let writer = PubKey::try_from(payload).map_err(|_| WireError::Malformed {
                frame: "WriterKey",
                reason: "writer key must be 32 bytes",
            })?;
            Ok(Frame::WriterKey { writer })
        }
        other => Err(WireError::UnknownType(other)),
    }
}

/// tokio-util codec for replication frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let body = encode_body(&frame);
        if body.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(body.len()));
        }
        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let frame_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(frame_len));
        }
        if src.len() < 4 + frame_len {
            src.reserve(4 + frame_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut body = src.split_to(frame_len);
        if body.is_empty() {
            return Err(WireError::Malformed {
                frame: "frame",
                reason: "empty body",
            });
        }

        let msg_type = body.get_u8();
        let seq = get_varint(&mut body)?;
        if body.remaining() < 4 {
            return Err(WireError::Malformed {
                frame: "frame",
                reason: "missing payload length",
            });
        }
        let payload_len = body.get_u32() as usize;
        if body.remaining() < payload_len {
            return Err(WireError::Malformed {
                frame: "frame",
                reason: "payload length exceeds frame",
            });
        }
        let payload = body.split_to(payload_len).to_vec();
        let rest = body.to_vec();

        decode_body(msg_type, seq, payload, &rest).map(Some)
    }
}

/// Framed writer for sending frames over any AsyncWrite stream
pub struct FrameSink<W: AsyncWrite + Send + Unpin> {
    inner: FramedWrite<W, FrameCodec>,
}

impl<W: AsyncWrite + Send + Unpin> FrameSink<W> {
    pub fn new(stream: W) -> Self {
        Self {
            inner: FramedWrite::new(stream, FrameCodec),
        }
    }

    /// Send one frame.
    pub async fn send(&mut self, frame: Frame) -> Result<(), WireError> {
        self.inner.send(frame).await
    }

    /// Consume the sink and return the underlying writer, for
    /// transport-specific finalization (e.g. iroh's `finish()`).
    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

/// Framed reader for receiving frames from any AsyncRead stream
pub struct FrameStream<R: AsyncRead + Send + Unpin> {
    inner: FramedRead<R, FrameCodec>,
}

impl<R: AsyncRead + Send + Unpin> FrameStream<R> {
    pub fn new(stream: R) -> Self {
        Self {
            inner: FramedRead::new(stream, FrameCodec),
        }
    }

    /// Receive the next frame (None on clean stream end).
    pub async fn recv(&mut self) -> Result<Option<Frame>, WireError> {
        match self.inner.next().await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }
}
