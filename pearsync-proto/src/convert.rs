//! Conversions between domain types and their protobuf encodings

use crate::storage::{self, operation::Kind};
use pearsync_model::{FileMeta, Hash, Operation, PubKey};
use prost::Message;
use thiserror::Error;

/// Errors converting protobuf messages into domain types
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("invalid hash length: expected 32 bytes, got {0}")]
    InvalidHashLength(usize),

    #[error("invalid public key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("empty operation")]
    EmptyOperation,
}

fn hash_from(bytes: Vec<u8>) -> Result<Hash, ConvertError> {
    Hash::try_from(bytes).map_err(|v| ConvertError::InvalidHashLength(v.len()))
}

fn key_from(bytes: Vec<u8>) -> Result<PubKey, ConvertError> {
    PubKey::try_from(bytes).map_err(|v| ConvertError::InvalidKeyLength(v.len()))
}

impl From<FileMeta> for storage::FileMeta {
    fn from(meta: FileMeta) -> Self {
        storage::FileMeta {
            content: meta.content,
            size: meta.size,
            mtime_ms: meta.mtime_ms,
            mode: meta.mode,
            hash: meta.hash.to_vec(),
            author: meta.author.to_vec(),
        }
    }
}

impl TryFrom<storage::FileMeta> for FileMeta {
    type Error = ConvertError;

    fn try_from(proto: storage::FileMeta) -> Result<Self, Self::Error> {
        Ok(FileMeta {
            content: proto.content,
            size: proto.size,
            mtime_ms: proto.mtime_ms,
            mode: proto.mode,
            hash: hash_from(proto.hash)?,
            author: key_from(proto.author)?,
        })
    }
}

impl From<Operation> for storage::Operation {
    fn from(op: Operation) -> Self {
        let kind = match op {
            Operation::Put { path, meta } => Kind::Put(storage::Put {
                path,
                meta: Some(meta.into()),
            }),
            Operation::Del { path } => Kind::Del(storage::Del { path }),
            Operation::AddWriter { writer } => Kind::AddWriter(storage::AddWriter {
                writer: writer.to_vec(),
            }),
            Operation::RemoveWriter { writer } => Kind::RemoveWriter(storage::RemoveWriter {
                writer: writer.to_vec(),
            }),
        };
        storage::Operation { kind: Some(kind) }
    }
}

impl TryFrom<storage::Operation> for Operation {
    type Error = ConvertError;

    fn try_from(proto: storage::Operation) -> Result<Self, Self::Error> {
        match proto.kind.ok_or(ConvertError::EmptyOperation)? {
            Kind::Put(put) => {
                let meta = put.meta.ok_or(ConvertError::MissingField("put.meta"))?;
                Ok(Operation::Put {
                    path: put.path,
                    meta: meta.try_into()?,
                })
            }
            Kind::Del(del) => Ok(Operation::Del { path: del.path }),
            Kind::AddWriter(add) => Ok(Operation::AddWriter {
                writer: key_from(add.writer)?,
            }),
            Kind::RemoveWriter(rm) => Ok(Operation::RemoveWriter {
                writer: key_from(rm.writer)?,
            }),
        }
    }
}

/// Encode a domain operation to block payload bytes.
pub fn encode_operation(op: Operation) -> Vec<u8> {
    storage::Operation::from(op).encode_to_vec()
}

/// Decode a block payload into a domain operation.
pub fn decode_operation(bytes: &[u8]) -> Result<Operation, ConvertError> {
    storage::Operation::decode(bytes)?.try_into()
}
