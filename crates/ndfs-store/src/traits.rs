//! Core traits and types for block storage.

use ndfs_types::{Block, BlockId};
use tokio::io::AsyncRead;

use crate::error::StoreError;

/// Readable stream over a finalized block.
pub type BlockReader = Box<dyn AsyncRead + Send + Unpin>;

/// Capacity information for a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageCapacity {
    /// Total capacity in bytes.
    pub total_bytes: u64,
    /// Bytes currently used.
    pub used_bytes: u64,
    /// Bytes available for new data.
    pub available_bytes: u64,
}

/// Handle on a block that is open for writing.
///
/// Dropping the handle without calling [`finalize`](BlockWriter::finalize)
/// abandons the block: it never becomes readable.
#[async_trait::async_trait]
pub trait BlockWriter: Send {
    /// The block being written.
    fn block_id(&self) -> BlockId;

    /// Bytes appended so far.
    fn bytes_written(&self) -> u64;

    /// Append bytes to the open block.
    async fn append(&mut self, data: &[u8]) -> Result<(), StoreError>;

    /// Make the block durable and visible to readers.
    async fn finalize(self: Box<Self>) -> Result<Block, StoreError>;
}

/// Trait for storing and serving blocks.
///
/// Implementations are safe for concurrent readers and for concurrent writers
/// of distinct blocks. Two writers of the same block are refused with
/// [`StoreError::Busy`].
#[async_trait::async_trait]
pub trait BlockStore: Send + Sync {
    /// Open a new block for writing.
    async fn create(&self, id: BlockId) -> Result<Box<dyn BlockWriter>, StoreError>;

    /// Whether the block is finalized and present.
    async fn is_valid(&self, id: BlockId) -> bool;

    /// Length of a finalized block.
    async fn length(&self, id: BlockId) -> Result<u64, StoreError>;

    /// Open a finalized block for reading.
    async fn open_for_read(&self, id: BlockId) -> Result<BlockReader, StoreError>;

    /// Delete blocks. Missing blocks are skipped; returns how many were removed.
    async fn invalidate(&self, ids: &[BlockId]) -> usize;

    /// Report current storage capacity.
    async fn capacity(&self) -> Result<StorageCapacity, StoreError>;

    /// List every finalized block.
    async fn list_all(&self) -> Result<Vec<Block>, StoreError>;
}
