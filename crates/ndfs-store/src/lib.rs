//! Local block storage for the data node.
//!
//! This crate defines the [`BlockStore`] trait, the only way the rest of the
//! node touches block data, along with two backends:
//!
//! - [`FileStore`]: one file per block under `current/`, open blocks under `tmp/`.
//! - [`MemoryStore`]: volatile storage backed by a `RwLock<HashMap>`.
//!
//! A block is written through a [`BlockWriter`] and becomes visible to
//! readers only once the writer is finalized.

mod error;
mod file_store;
mod memory_store;
mod traits;

pub use error::StoreError;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use traits::{BlockReader, BlockStore, BlockWriter, StorageCapacity};
