//! # Domain Errors
//!
//! Error types for the block log.

use bc_01_channel::ChannelError;
use thiserror::Error;

/// Errors that can occur during block log operations.
#[derive(Debug, Error)]
pub enum BlockLogError {
    /// Entry rejected before any write.
    #[error("invalid entry: {reason}")]
    InvalidEntry { reason: &'static str },

    /// A raw record handed to `save` or `decode` has the wrong size.
    #[error("record must be {expected} bytes, got {actual}")]
    InvalidRecordLength { expected: usize, actual: usize },

    /// The file ended inside a record.
    #[error("short record at index {index}: {actual} of {expected} bytes")]
    ShortRecord {
        index: u64,
        expected: usize,
        actual: usize,
    },

    /// Nothing stored at this index.
    #[error("no block at index {index}")]
    BlockNotFound { index: u64 },

    #[error("malformed message: {reason}")]
    InvalidMessage { reason: &'static str },

    #[error("block log is not open")]
    NotOpen,

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl BlockLogError {
    /// True when the underlying file was closed mid-operation.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Channel(e) if e.is_aborted())
    }
}
