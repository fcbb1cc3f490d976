//! Replication pusher.
//!
//! Copies one locally held block to a replica chain on the coordinator's
//! instruction, acting as a write-pipeline client.

use std::sync::Arc;

use ndfs_net::protocol::{self, WriteHeader};
use ndfs_net::{NetError, client};
use ndfs_store::BlockStore;
use ndfs_types::{Block, BlockId, Encoding, PeerAddress};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tracing::{info, warn};

use crate::error::DataNodeError;

/// One (block, target chain) replication job.
///
/// `targets[0]` receives the block and mirrors it down the rest of the chain.
/// Failures are logged, never propagated: the coordinator re-issues the
/// transfer if the block stays under-replicated.
pub struct ReplicationPusher {
    store: Arc<dyn BlockStore>,
    block: BlockId,
    targets: Vec<PeerAddress>,
    buffer_size: usize,
}

impl ReplicationPusher {
    /// Create a pusher for `block` along `targets`.
    pub fn new(
        store: Arc<dyn BlockStore>,
        block: BlockId,
        targets: Vec<PeerAddress>,
        buffer_size: usize,
    ) -> Self {
        Self {
            store,
            block,
            targets,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Send the block and wait for the first target's completion marker.
    ///
    /// Returns the number of bytes pushed.
    pub async fn push(&self) -> Result<u64, DataNodeError> {
        let first = self.targets.first().ok_or(NetError::NoTargets)?;
        let len = self.store.length(self.block).await?;
        let reader = self.store.open_for_read(self.block).await?;

        let stream = client::connect(first).await?;
        let mut stream = BufStream::with_capacity(self.buffer_size, self.buffer_size, stream);
        WriteHeader {
            block: Block::new(self.block, len),
            targets: self.targets.clone(),
            encoding: Encoding::RunLength,
            first_len: len,
        }
        .write_to(&mut stream)
        .await?;

        let sent = tokio::io::copy(&mut reader.take(len), &mut stream).await?;
        if sent < len {
            // The receiver is left waiting for bytes that never come; dropping
            // the connection makes it discard the partial block.
            return Err(DataNodeError::ShortBlock {
                block: self.block,
                expected: len,
                actual: sent,
            });
        }
        stream.flush().await?;
        protocol::read_completion(&mut stream).await?;
        Ok(len)
    }

    /// Run the job to completion, logging the outcome.
    pub async fn run(self) {
        let target = self
            .targets
            .first()
            .map(ToString::to_string)
            .unwrap_or_default();
        match self.push().await {
            Ok(len) => info!(
                block = %self.block,
                len,
                %target,
                hops = self.targets.len(),
                "replicated block"
            ),
            Err(e) => warn!(block = %self.block, %target, %e, "replication failed"),
        }
    }
}
