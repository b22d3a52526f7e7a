//! Generated Protobuf definitions for pearsync

pub mod storage {
    include!(concat!(env!("OUT_DIR"), "/pearsync.storage.rs"));
}

pub mod gossip {
    include!(concat!(env!("OUT_DIR"), "/pearsync.gossip.rs"));
}

mod convert;

pub use convert::{decode_operation, encode_operation, ConvertError};
