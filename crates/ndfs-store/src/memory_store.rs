//! In-memory block storage backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use ndfs_types::{Block, BlockId};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{BlockReader, BlockStore, BlockWriter, StorageCapacity};

/// In-memory block store backed by a `RwLock<HashMap>`.
///
/// Useful for testing and for nodes configured to run in memory-only mode.
/// Tracks total bytes stored (finalized plus in-flight) against a
/// configurable maximum.
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    blocks: RwLock<HashMap<BlockId, Bytes>>,
    /// Taken before `blocks` whenever both are held.
    usage: Mutex<Usage>,
    max_bytes: u64,
}

#[derive(Default)]
struct Usage {
    /// Bytes reserved by each open writer.
    open: HashMap<BlockId, u64>,
    /// Finalized plus reserved bytes.
    used: u64,
}

impl MemoryStore {
    /// Create a new in-memory store with the given capacity limit.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                blocks: RwLock::new(HashMap::new()),
                usage: Mutex::new(Usage::default()),
                max_bytes,
            }),
        }
    }
}

struct MemoryBlockWriter {
    id: BlockId,
    inner: Arc<MemoryInner>,
    buf: Vec<u8>,
}

impl Drop for MemoryBlockWriter {
    fn drop(&mut self) {
        let mut usage = self.inner.usage.lock().expect("lock poisoned");
        // Absent once finalized: the bytes then belong to the stored block.
        if let Some(reserved) = usage.open.remove(&self.id) {
            usage.used -= reserved;
        }
    }
}

#[async_trait::async_trait]
impl BlockWriter for MemoryBlockWriter {
    fn block_id(&self) -> BlockId {
        self.id
    }

    fn bytes_written(&self) -> u64 {
        self.buf.len() as u64
    }

    async fn append(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let needed = data.len() as u64;
        {
            let mut usage = self.inner.usage.lock().expect("lock poisoned");
            let available = self.inner.max_bytes.saturating_sub(usage.used);
            if needed > available {
                return Err(StoreError::CapacityExceeded { needed, available });
            }
            usage.used += needed;
            *usage.open.entry(self.id).or_default() += needed;
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> Result<Block, StoreError> {
        let data = Bytes::from(std::mem::take(&mut self.buf));
        let block = Block::new(self.id, data.len() as u64);
        {
            let mut usage = self.inner.usage.lock().expect("lock poisoned");
            usage.open.remove(&self.id);
            self.inner
                .blocks
                .write()
                .expect("lock poisoned")
                .insert(self.id, data);
        }
        debug!(block = %self.id, len = block.len, "finalized block in memory");
        Ok(block)
    }
}

#[async_trait::async_trait]
impl BlockStore for MemoryStore {
    async fn create(&self, id: BlockId) -> Result<Box<dyn BlockWriter>, StoreError> {
        let mut usage = self.inner.usage.lock().expect("lock poisoned");
        if usage.open.contains_key(&id) {
            return Err(StoreError::Busy(id));
        }
        if self.inner.blocks.read().expect("lock poisoned").contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        usage.open.insert(id, 0);
        Ok(Box::new(MemoryBlockWriter {
            id,
            inner: self.inner.clone(),
            buf: Vec::new(),
        }))
    }

    async fn is_valid(&self, id: BlockId) -> bool {
        self.inner
            .blocks
            .read()
            .expect("lock poisoned")
            .contains_key(&id)
    }

    async fn length(&self, id: BlockId) -> Result<u64, StoreError> {
        let map = self.inner.blocks.read().expect("lock poisoned");
        map.get(&id)
            .map(|d| d.len() as u64)
            .ok_or(StoreError::NotFound(id))
    }

    async fn open_for_read(&self, id: BlockId) -> Result<BlockReader, StoreError> {
        let data = {
            let map = self.inner.blocks.read().expect("lock poisoned");
            map.get(&id).cloned().ok_or(StoreError::NotFound(id))?
        };
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn invalidate(&self, ids: &[BlockId]) -> usize {
        let mut usage = self.inner.usage.lock().expect("lock poisoned");
        let mut map = self.inner.blocks.write().expect("lock poisoned");
        let mut removed = 0;
        for id in ids {
            if let Some(data) = map.remove(id) {
                usage.used -= data.len() as u64;
                debug!(block = %id, "deleted block from memory");
                removed += 1;
            }
        }
        removed
    }

    async fn capacity(&self) -> Result<StorageCapacity, StoreError> {
        let used = self.inner.usage.lock().expect("lock poisoned").used;
        Ok(StorageCapacity {
            total_bytes: self.inner.max_bytes,
            used_bytes: used,
            available_bytes: self.inner.max_bytes.saturating_sub(used),
        })
    }

    async fn list_all(&self) -> Result<Vec<Block>, StoreError> {
        let map = self.inner.blocks.read().expect("lock poisoned");
        Ok(map
            .iter()
            .map(|(id, data)| Block::new(*id, data.len() as u64))
            .collect())
    }
}
