//! Error types for block storage operations.

use ndfs_types::BlockId;

/// Errors that can occur during block storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The block is not finalized or not present.
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// The block has already been finalized and cannot be rewritten.
    #[error("block already exists: {0}")]
    AlreadyExists(BlockId),

    /// Another writer currently holds the block open.
    #[error("block is being written by another writer: {0}")]
    Busy(BlockId),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has reached its capacity limit.
    #[error("store capacity exceeded: need {needed} bytes, only {available} available")]
    CapacityExceeded {
        /// Bytes needed for the operation.
        needed: u64,
        /// Bytes currently available.
        available: u64,
    },
}
