//! Coordinator control loop.
//!
//! Every wake the loop sends whatever is due (heartbeat, full block report),
//! reports blocks received since the last cycle, then polls for and executes
//! one pending command. It sleeps until the next heartbeat is due or a write
//! handler queues a block, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use ndfs_net::Coordinator;
use ndfs_store::BlockStore;
use ndfs_types::{BLOCK_REPORT_INTERVAL, BlockCommand, BlockId, HEARTBEAT_INTERVAL, PeerAddress};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::DataNodeError;
use crate::pusher::ReplicationPusher;
use crate::received::ReceivedBlocks;

/// Control loop timing.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Interval between full block reports.
    pub block_report_interval: Duration,
    /// I/O buffer size for replication pushes.
    pub buffer_size: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            block_report_interval: BLOCK_REPORT_INTERVAL,
            buffer_size: 4096,
        }
    }
}

/// The node's only channel to the coordinator.
pub struct ControlLoop {
    node: PeerAddress,
    store: Arc<dyn BlockStore>,
    coordinator: Arc<dyn Coordinator>,
    received: Arc<ReceivedBlocks>,
    config: ControlConfig,
    last_heartbeat: Option<Instant>,
    last_report: Option<Instant>,
}

impl ControlLoop {
    /// Create a loop reporting as `node`. Nothing is sent until the first [`tick`](Self::tick).
    pub fn new(
        node: PeerAddress,
        store: Arc<dyn BlockStore>,
        coordinator: Arc<dyn Coordinator>,
        received: Arc<ReceivedBlocks>,
        config: ControlConfig,
    ) -> Self {
        Self {
            node,
            store,
            coordinator,
            received,
            config,
            last_heartbeat: None,
            last_report: None,
        }
    }

    /// Forget when the last heartbeat and report were sent, so the next tick sends both.
    pub fn reset(&mut self) {
        self.last_heartbeat = None;
        self.last_report = None;
    }

    /// Run one cycle.
    ///
    /// Returns the handles of replication pushers started by the command; they
    /// run detached unless the caller awaits them.
    pub async fn tick(&mut self) -> Result<Vec<JoinHandle<()>>, DataNodeError> {
        let now = Instant::now();

        // Local storage failures skip only their own step and retry on the
        // next heartbeat; coordinator failures end the cycle.
        if is_due(self.last_heartbeat, self.config.heartbeat_interval, now) {
            match self.store.capacity().await {
                Ok(capacity) => {
                    self.coordinator
                        .send_heartbeat(&self.node, capacity.total_bytes, capacity.available_bytes)
                        .await?;
                    debug!(
                        capacity = capacity.total_bytes,
                        remaining = capacity.available_bytes,
                        "sent heartbeat"
                    );
                }
                Err(e) => error!(%e, "cannot read storage capacity, skipping heartbeat"),
            }
            self.last_heartbeat = Some(now);
        }

        if is_due(self.last_report, self.config.block_report_interval, now) {
            match self.store.list_all().await {
                Ok(blocks) => {
                    self.coordinator.block_report(&self.node, &blocks).await?;
                    self.last_report = Some(now);
                    info!(blocks = blocks.len(), "sent block report");
                }
                Err(e) => {
                    error!(%e, "cannot list local blocks, skipping block report");
                    self.last_report = Some(self.retry_on_next_heartbeat(now));
                }
            }
        }

        let batch = self.received.drain();
        if !batch.is_empty() {
            if let Err(e) = self.coordinator.block_received(&self.node, &batch).await {
                self.received.requeue(batch);
                return Err(e.into());
            }
            debug!(blocks = batch.len(), "reported received blocks");
        }

        let command = self.coordinator.get_pending_command(&self.node).await?;
        self.execute(command).await
    }

    /// A last-report time that makes the report due again one heartbeat from `now`.
    fn retry_on_next_heartbeat(&self, now: Instant) -> Instant {
        let early = self
            .config
            .block_report_interval
            .saturating_sub(self.config.heartbeat_interval);
        now.checked_sub(early).unwrap_or(now)
    }

    /// Carry out a coordinator command.
    ///
    /// A transfer item naming a block this node does not hold is reported back
    /// and skipped; the other items still run.
    pub async fn execute(&self, command: BlockCommand) -> Result<Vec<JoinHandle<()>>, DataNodeError> {
        match command {
            BlockCommand::NoOp => Ok(Vec::new()),
            BlockCommand::Invalidate { blocks } => {
                let ids: Vec<BlockId> = blocks.iter().map(|b| b.id).collect();
                let removed = self.store.invalidate(&ids).await;
                info!(requested = ids.len(), removed, "invalidated blocks");
                Ok(Vec::new())
            }
            transfer @ BlockCommand::Transfer { .. } => {
                let mut pushers = Vec::new();
                for (block, targets) in transfer.transfers() {
                    if targets.is_empty() {
                        debug!(block = %block.id, "transfer without targets, skipping");
                        continue;
                    }
                    if !self.store.is_valid(block.id).await {
                        let message = format!("cannot transfer {}: block is not valid here", block.id);
                        warn!(block = %block.id, "transfer of invalid block requested");
                        self.coordinator.error_report(&self.node, &message).await?;
                        continue;
                    }
                    let pusher = ReplicationPusher::new(
                        self.store.clone(),
                        block.id,
                        targets,
                        self.config.buffer_size,
                    );
                    pushers.push(tokio::spawn(pusher.run()));
                }
                Ok(pushers)
            }
        }
    }

    /// Sleep until the next heartbeat or report is due, or a received block is queued.
    pub async fn wait(&self) {
        let now = Instant::now();
        let heartbeat = self
            .last_heartbeat
            .map_or(now, |t| t + self.config.heartbeat_interval);
        let report = self
            .last_report
            .map_or(now, |t| t + self.config.block_report_interval);

        tokio::select! {
            _ = tokio::time::sleep_until(heartbeat.min(report)) => {}
            _ = self.received.notified() => {}
        }
    }

    /// Cycle until a coordinator call fails.
    ///
    /// Local storage errors are logged by [`tick`](Self::tick) and do not end the cycle.
    pub async fn run(&mut self) -> Result<(), DataNodeError> {
        loop {
            // Pushers run detached.
            self.tick().await?;
            self.wait().await;
        }
    }

    /// Cycle forever, restarting with fresh timers after `backoff` whenever
    /// the coordinator becomes unreachable.
    pub async fn run_supervised(mut self, backoff: Duration) {
        info!(node = %self.node, "control loop started");
        loop {
            if let Err(e) = self.run().await {
                warn!(%e, backoff_ms = backoff.as_millis() as u64, "lost contact with coordinator");
            }
            tokio::time::sleep(backoff).await;
            self.reset();
        }
    }
}

fn is_due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.is_none_or(|t| now.duration_since(t) >= interval)
}
