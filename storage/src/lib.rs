//! Storage layer for recstore
//!
//! This crate provides the persistent record-id index (an on-disk B-tree
//! mapping record ids to block offsets in the data file), the free-block
//! scanner over the data file, and the file primitives both are built on.

pub mod codec;
pub mod config;
pub mod file;
pub mod index;
pub mod record;
pub mod store;

pub use config::IndexConfig;
pub use file::{BlockFile, DiskFile, MemFile};
pub use index::{IndexHeader, RecordIndex, TreeStats};
pub use record::BlockHeader;
pub use store::{DirStore, MemStore, RecordStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid record id {0}")]
    InvalidRecordId(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Build an `InvalidData` I/O error; the on-disk format has no checksums,
    /// so every malformed read surfaces this way.
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            msg.into(),
        ))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
