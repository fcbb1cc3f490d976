//! Shared test harness for ndfs integration tests.
//!
//! Provides [`TestNode`]: a real data node listening on a loopback port,
//! storing blocks in a temporary directory, and reporting to its own
//! [`MockCoordinator`].

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ndfs_datanode::{ControlConfig, DataNode, DataNodeConfig};
use ndfs_net::client::{self, ReadResponse};
use ndfs_net::{Coordinator, NetError};
use ndfs_store::{BlockStore, FileStore};
use ndfs_types::{Block, BlockCommand, BlockId, Encoding, PeerAddress};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How long polling helpers wait before failing the test.
pub const TIMEOUT: Duration = Duration::from_secs(10);

// =========================================================================
// Mock coordinator
// =========================================================================

/// A coordinator call as recorded by [`MockCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Heartbeat { capacity: u64, remaining: u64 },
    BlockReport(Vec<Block>),
    BlockReceived(Vec<Block>),
    GetCommand,
    ErrorReport(String),
}

/// In-memory coordinator: records every call and hands out queued commands.
///
/// Supports failure injection: while unreachable, every call fails.
#[derive(Default)]
pub struct MockCoordinator {
    calls: Mutex<Vec<Call>>,
    commands: Mutex<VecDeque<BlockCommand>>,
    unreachable: AtomicBool,
}

impl MockCoordinator {
    /// Queue a command for the next poll.
    pub fn queue(&self, command: BlockCommand) {
        self.commands.lock().unwrap().push_back(command);
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Simulate losing (or regaining) the coordinator.
    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    /// Blocks reported through `blockReceived`, in report order.
    pub fn received(&self) -> Vec<Block> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::BlockReceived(blocks) => Some(blocks),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// The most recent full block report, if any.
    pub fn last_report(&self) -> Option<Vec<Block>> {
        self.calls().into_iter().rev().find_map(|c| match c {
            Call::BlockReport(blocks) => Some(blocks),
            _ => None,
        })
    }

    /// Messages sent through `errorReport`.
    pub fn errors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ErrorReport(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> Result<(), NetError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(NetError::Io(std::io::ErrorKind::ConnectionRefused.into()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl Coordinator for MockCoordinator {
    async fn send_heartbeat(
        &self,
        _node: &PeerAddress,
        capacity: u64,
        remaining: u64,
    ) -> Result<(), NetError> {
        self.record(Call::Heartbeat {
            capacity,
            remaining,
        })
    }

    async fn block_report(&self, _node: &PeerAddress, blocks: &[Block]) -> Result<(), NetError> {
        self.record(Call::BlockReport(blocks.to_vec()))
    }

    async fn block_received(&self, _node: &PeerAddress, blocks: &[Block]) -> Result<(), NetError> {
        self.record(Call::BlockReceived(blocks.to_vec()))
    }

    async fn get_pending_command(&self, _node: &PeerAddress) -> Result<BlockCommand, NetError> {
        self.record(Call::GetCommand)?;
        Ok(self
            .commands
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn error_report(&self, _node: &PeerAddress, message: &str) -> Result<(), NetError> {
        self.record(Call::ErrorReport(message.to_string()))
    }
}

// =========================================================================
// Test node
// =========================================================================

/// Node settings used by the harness: loopback, ephemeral port, fast heartbeats.
pub fn test_config() -> DataNodeConfig {
    DataNodeConfig {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        port_search: 1,
        hostname: "127.0.0.1".to_string(),
        control: ControlConfig {
            heartbeat_interval: Duration::from_millis(50),
            block_report_interval: Duration::from_secs(3600),
            buffer_size: 4096,
        },
        retry_backoff: Duration::from_millis(50),
    }
}

/// A running data node backed by a [`FileStore`] in a temporary directory.
pub struct TestNode {
    pub address: PeerAddress,
    pub store: Arc<dyn BlockStore>,
    pub coordinator: Arc<MockCoordinator>,
    dir: PathBuf,
    temp: Option<TempDir>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TestNode {
    /// Start a node with [`test_config`].
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a node after adjusting [`test_config`].
    pub async fn start_with(configure: impl FnOnce(&mut DataNodeConfig)) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().to_path_buf();
        let mut config = test_config();
        configure(&mut config);
        let mut node = Self::start_in(&dir, config).await;
        node.temp = Some(temp);
        node
    }

    async fn start_in(dir: &Path, config: DataNodeConfig) -> Self {
        let store = FileStore::new(dir).unwrap();
        store.recover().unwrap();
        let store: Arc<dyn BlockStore> = Arc::new(store);
        let node = DataNode::bind(config, store.clone()).await.unwrap();
        let address = node.address().clone();
        let coordinator = Arc::new(MockCoordinator::default());

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(node.run(coordinator.clone(), async {
            let _ = rx.await;
        }));

        Self {
            address,
            store,
            coordinator,
            dir: dir.to_path_buf(),
            temp: None,
            shutdown: Some(tx),
            task: Some(task),
        }
    }

    /// Stop the node and start a fresh process on the same directory.
    pub async fn restart(mut self) -> Self {
        self.stop().await;
        let mut node = Self::start_in(&self.dir, test_config()).await;
        node.temp = self.temp.take();
        node
    }

    /// Close the listener and wait for the node to shut down.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            tokio::time::timeout(TIMEOUT, task)
                .await
                .expect("node did not stop")
                .unwrap();
        }
    }

    /// Files currently held in the store's `tmp/` directory.
    pub fn tmp_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.dir.join("tmp"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    /// Read a whole block, `None` if the node reports it invalid.
    pub async fn read(&self, id: i64) -> Option<Vec<u8>> {
        self.read_skip(id, None).await.map(|r| r.data)
    }

    /// Read a block with an optional skip.
    pub async fn read_skip(&self, id: i64, skip: Option<u64>) -> Option<ReadResponse> {
        client::read_block(&self.address, BlockId::new(id), skip)
            .await
            .unwrap()
    }

    /// Write a block to this node alone.
    pub async fn write(&self, id: i64, data: &[u8]) {
        write_chain(std::slice::from_ref(&self.address), id, data).await;
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Write a block through `chain` with run-length encoding.
pub async fn write_chain(chain: &[PeerAddress], id: i64, data: &[u8]) {
    client::write_block(chain, BlockId::new(id), data, Encoding::RunLength, 0)
        .await
        .unwrap();
}

/// Poll `check` until it returns true, failing the test after [`TIMEOUT`].
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = tokio::time::timeout(TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

// =========================================================================
// Misbehaving peers
// =========================================================================

/// A peer that accepts one connection, reads at most `limit` bytes and hangs up.
///
/// Resolves to the number of bytes it consumed.
pub async fn truncating_peer(limit: usize) -> (PeerAddress, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 1024];
        let mut total = 0;
        while total < limit {
            let want = buf.len().min(limit - total);
            match socket.read(&mut buf[..want]).await {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
        total
    });
    (PeerAddress::new("127.0.0.1", port), task)
}

/// An address nothing listens on.
pub async fn dead_peer() -> PeerAddress {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    PeerAddress::new("127.0.0.1", port)
}

// =========================================================================
// Data
// =========================================================================

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    test_data_seeded(size, 0xDEAD_BEEF)
}

/// Generate test data with a specific seed (for unique blocks).
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}
