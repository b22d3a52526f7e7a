//! Log file I/O for append-only block storage
//!
//! Each writer has a log file of length-delimited LogRecord messages.
//! LogRecord = { hash: BLAKE3 of block_bytes, block_bytes: SignedBlock }

use crate::block::{Block, BlockError};
use crate::MAX_BLOCK_SIZE;
use pearsync_proto::storage::LogRecord;
use prost::Message;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during log file operations
#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("proto decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("block too large: {0} bytes (max {MAX_BLOCK_SIZE})")]
    BlockTooLarge(usize),

    #[error("unexpected EOF while reading record")]
    UnexpectedEof,

    #[error("hash mismatch: stored hash does not match computed hash")]
    HashMismatch,
}

/// Append a block to a log file as a LogRecord. Returns the new file size.
pub fn append_block(path: impl AsRef<Path>, block: &Block) -> Result<u64, LogError> {
    let path = path.as_ref();

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);

    let block_bytes = block.encode();
    if block_bytes.len() > MAX_BLOCK_SIZE {
        return Err(LogError::BlockTooLarge(block_bytes.len()));
    }

    let hash: [u8; 32] = blake3::hash(&block_bytes).into();
    let record = LogRecord {
        hash: hash.to_vec(),
        block_bytes,
    };

    let mut buf = Vec::new();
    record
        .encode_length_delimited(&mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    writer.write_all(&buf)?;
    writer.flush()?;

    // Ensure data is physically on disk before the append is acknowledged
    writer.get_ref().sync_all()?;

    let metadata = std::fs::metadata(path)?;
    Ok(metadata.len())
}

/// Read all blocks from a log file (with integrity verification).
/// A missing file reads as an empty log.
pub fn read_blocks(path: impl AsRef<Path>) -> Result<Vec<Block>, LogError> {
    let reader = match LogReader::open(&path) {
        Ok(r) => r,
        Err(LogError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    reader.collect()
}

/// Read blocks with sequence in `[from_seq, to_seq]` (inclusive).
pub fn read_range(
    path: impl AsRef<Path>,
    from_seq: u64,
    to_seq: u64,
) -> Result<Vec<Block>, LogError> {
    let reader = match LogReader::open(&path) {
        Ok(r) => r,
        Err(LogError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut blocks = Vec::new();
    for result in reader {
        let block = result?;
        if block.seq > to_seq {
            break;
        }
        if block.seq >= from_seq {
            blocks.push(block);
        }
    }
    Ok(blocks)
}

/// Iterator over blocks in a log file
pub struct LogReader {
    reader: BufReader<File>,
}

impl LogReader {
    /// Open a log file for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl Iterator for LogReader {
    type Item = Result<Block, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        match read_one_record(&mut self.reader) {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Read a single LogRecord, verify its hash, and decode the block
fn read_one_record<R: Read>(reader: &mut R) -> Result<Option<Block>, LogError> {
    let record_bytes = match read_length_delimited_bytes(reader) {
        Ok(bytes) => bytes,
        Err(LogError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let record = LogRecord::decode(&record_bytes[..])?;

    let computed_hash: [u8; 32] = blake3::hash(&record.block_bytes).into();
    let stored_hash: [u8; 32] = record
        .hash
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid hash length"))?;

    if computed_hash != stored_hash {
        return Err(LogError::HashMismatch);
    }

    let block = Block::decode(&record.block_bytes)?;
    Ok(Some(block))
}

/// Read length-delimited bytes from a reader
fn read_length_delimited_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, LogError> {
    let mut prefix_buf = Vec::with_capacity(10);
    let mut byte = [0u8; 1];

    loop {
        reader.read_exact(&mut byte)?;
        prefix_buf.push(byte[0]);

        if byte[0] & 0x80 == 0 {
            break;
        }
        if prefix_buf.len() > 10 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint too long").into());
        }
    }

    let len = prost::decode_length_delimiter(&prefix_buf[..])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if len > MAX_BLOCK_SIZE {
        return Err(LogError::BlockTooLarge(len));
    }

    let mut data_buf = vec![0u8; len];
    reader.read_exact(&mut data_buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            LogError::UnexpectedEof
        } else {
            e.into()
        }
    })?;

    Ok(data_buf)
}
