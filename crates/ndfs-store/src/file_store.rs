//! File-based block storage backend.
//!
//! Layout under the base directory:
//!
//! - `current/blk_<id>`: finalized blocks, visible to readers.
//! - `tmp/blk_<id>`: blocks still being written.
//!
//! Finalizing syncs the temporary file and renames it into `current/`, so a
//! reader never observes a partially written block.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ndfs_types::{Block, BlockId};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::traits::{BlockReader, BlockStore, BlockWriter, StorageCapacity};

const CURRENT_DIR: &str = "current";
const TMP_DIR: &str = "tmp";

/// File-based block store.
pub struct FileStore {
    inner: Arc<Inner>,
}

struct Inner {
    base_dir: PathBuf,
    current_dir: PathBuf,
    tmp_dir: PathBuf,
    /// Blocks that currently have a live writer.
    open: Mutex<HashSet<BlockId>>,
}

impl Inner {
    fn block_path(&self, id: BlockId) -> PathBuf {
        self.current_dir.join(id.file_name())
    }

    fn tmp_path(&self, id: BlockId) -> PathBuf {
        self.tmp_dir.join(id.file_name())
    }

    fn release(&self, id: BlockId) {
        self.open.lock().expect("open set poisoned").remove(&id);
    }
}

impl FileStore {
    /// Open (or create) a file store rooted at the given directory.
    ///
    /// Leaves `tmp/` untouched, so it is safe on a directory a live node is
    /// writing to. Call [`FileStore::recover`] before serving.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let current_dir = base_dir.join(CURRENT_DIR);
        let tmp_dir = base_dir.join(TMP_DIR);
        std::fs::create_dir_all(&current_dir)?;
        std::fs::create_dir_all(&tmp_dir)?;

        Ok(Self {
            inner: Arc::new(Inner {
                base_dir,
                current_dir,
                tmp_dir,
                open: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Discard blocks an earlier process left unfinalized in `tmp/`.
    ///
    /// Must run before the store accepts writes. Returns how many were removed.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let mut discarded = 0usize;
        for entry in std::fs::read_dir(&self.inner.tmp_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
                discarded += 1;
            }
        }
        if discarded > 0 {
            info!(discarded, dir = %self.inner.tmp_dir.display(), "discarded unfinalized blocks");
        }
        Ok(discarded)
    }

    /// Root directory of this store.
    pub fn base_dir(&self) -> &Path {
        &self.inner.base_dir
    }

    #[cfg(test)]
    fn block_path(&self, id: BlockId) -> PathBuf {
        self.inner.block_path(id)
    }
}

/// Writer for a block held in `tmp/` until finalized.
struct FileBlockWriter {
    id: BlockId,
    inner: Arc<Inner>,
    file: BufWriter<tokio::fs::File>,
    tmp_path: PathBuf,
    written: u64,
    finalized: bool,
}

impl Drop for FileBlockWriter {
    fn drop(&mut self) {
        if !self.finalized {
            match std::fs::remove_file(&self.tmp_path) {
                Ok(()) => debug!(block = %self.id, "discarded unfinalized block"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(block = %self.id, %e, "failed to remove unfinalized block"),
            }
        }
        self.inner.release(self.id);
    }
}

#[async_trait::async_trait]
impl BlockWriter for FileBlockWriter {
    fn block_id(&self) -> BlockId {
        self.id
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }

    async fn append(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> Result<Block, StoreError> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;

        let dest = self.inner.block_path(self.id);
        tokio::fs::rename(&self.tmp_path, &dest).await?;
        self.finalized = true;

        debug!(block = %self.id, len = self.written, path = %dest.display(), "finalized block");
        Ok(Block::new(self.id, self.written))
    }
}

#[async_trait::async_trait]
impl BlockStore for FileStore {
    async fn create(&self, id: BlockId) -> Result<Box<dyn BlockWriter>, StoreError> {
        if !self.inner.open.lock().expect("open set poisoned").insert(id) {
            return Err(StoreError::Busy(id));
        }

        // Checked after claiming the id so a concurrent finalize cannot slip in between.
        match tokio::fs::try_exists(self.inner.block_path(id)).await {
            Ok(false) => {}
            Ok(true) => {
                self.inner.release(id);
                return Err(StoreError::AlreadyExists(id));
            }
            Err(e) => {
                self.inner.release(id);
                return Err(StoreError::Io(e));
            }
        }

        let tmp_path = self.inner.tmp_path(id);
        let file = match tokio::fs::File::create(&tmp_path).await {
            Ok(f) => f,
            Err(e) => {
                self.inner.release(id);
                return Err(StoreError::Io(e));
            }
        };

        debug!(block = %id, path = %tmp_path.display(), "opened block for writing");
        Ok(Box::new(FileBlockWriter {
            id,
            inner: self.inner.clone(),
            file: BufWriter::new(file),
            tmp_path,
            written: 0,
            finalized: false,
        }))
    }

    async fn is_valid(&self, id: BlockId) -> bool {
        match tokio::fs::metadata(self.inner.block_path(id)).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    async fn length(&self, id: BlockId) -> Result<u64, StoreError> {
        match tokio::fs::metadata(self.inner.block_path(id)).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StoreError::NotFound(id)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn open_for_read(&self, id: BlockId) -> Result<BlockReader, StoreError> {
        match tokio::fs::File::open(self.inner.block_path(id)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn invalidate(&self, ids: &[BlockId]) -> usize {
        let mut removed = 0;
        for &id in ids {
            match tokio::fs::remove_file(self.inner.block_path(id)).await {
                Ok(()) => {
                    debug!(block = %id, "deleted block file");
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(block = %id, %e, "failed to delete block"),
            }
        }
        removed
    }

    async fn capacity(&self) -> Result<StorageCapacity, StoreError> {
        let path = self.inner.base_dir.clone();
        tokio::task::spawn_blocking(move || statvfs(&path))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn list_all(&self) -> Result<Vec<Block>, StoreError> {
        let mut blocks = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.inner.current_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(BlockId::from_file_name) {
                blocks.push(Block::new(id, meta.len()));
            }
        }
        Ok(blocks)
    }
}

/// Get filesystem capacity information using `libc::statvfs`.
#[cfg(unix)]
fn statvfs(path: &Path) -> Result<StorageCapacity, StoreError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c_path` is a valid null-terminated C string and `stat` is a
    // zero-initialized out-parameter that statvfs only writes to.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(StoreError::Io(std::io::Error::last_os_error()));
        }

        let block_size = stat.f_frsize as u64;
        let total = stat.f_blocks as u64 * block_size;
        // f_bavail excludes blocks reserved for root.
        let available = stat.f_bavail as u64 * block_size;
        let free = stat.f_bfree as u64 * block_size;

        Ok(StorageCapacity {
            total_bytes: total,
            used_bytes: total.saturating_sub(free),
            available_bytes: available,
        })
    }
}

#[cfg(not(unix))]
fn statvfs(_path: &Path) -> Result<StorageCapacity, StoreError> {
    Ok(StorageCapacity {
        total_bytes: 0,
        used_bytes: 0,
        available_bytes: 0,
    })
}
