//! Queue of blocks finalized since the last `blockReceived` report.

use std::sync::Mutex;

use ndfs_types::Block;
use tokio::sync::Notify;

/// Blocks finalized by write handlers, waiting to be reported.
///
/// Write handlers [`push`](Self::push); the control loop
/// [`drain`](Self::drain)s everything at once, so each block lands in exactly
/// one report. Pushing wakes a control loop waiting in
/// [`notified`](Self::notified).
#[derive(Debug, Default)]
pub struct ReceivedBlocks {
    blocks: Mutex<Vec<Block>>,
    notify: Notify,
}

impl ReceivedBlocks {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finalized block and wake the control loop.
    pub fn push(&self, block: Block) {
        self.blocks.lock().expect("received lock poisoned").push(block);
        self.notify.notify_one();
    }

    /// Take every queued block, leaving the queue empty.
    pub fn drain(&self) -> Vec<Block> {
        std::mem::take(&mut *self.blocks.lock().expect("received lock poisoned"))
    }

    /// Put back a drained batch whose report failed, ahead of newer entries.
    pub fn requeue(&self, mut batch: Vec<Block>) {
        let mut blocks = self.blocks.lock().expect("received lock poisoned");
        batch.append(&mut blocks);
        *blocks = batch;
    }

    /// Number of queued blocks.
    pub fn len(&self) -> usize {
        self.blocks.lock().expect("received lock poisoned").len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until a block is pushed.
    ///
    /// A push that happened while nobody was waiting completes the next call
    /// immediately.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
