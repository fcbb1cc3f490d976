//! Network layer for the ndfs data node.
//!
//! - [`protocol`]: the data-plane wire format (write/read headers, big-endian
//!   integers, length-prefixed strings).
//! - [`client`]: data-plane client helpers for writing and reading blocks.
//! - [`CoordinatorRequest`] / [`CoordinatorResponse`]: the coordinator RPC
//!   messages (postcard-serialized, length-prefixed frames).
//! - [`RpcCoordinator`]: TCP client implementing [`Coordinator`].

pub mod client;
mod error;
mod message;
pub mod protocol;
mod rpc;

use ndfs_types::{Block, BlockCommand, PeerAddress};

pub use error::NetError;
pub use message::{CoordinatorRequest, CoordinatorResponse};
pub use rpc::{MAX_FRAME_SIZE, RpcCoordinator, recv_frame, send_frame};

/// The narrow contract a data node consumes from its coordinator.
///
/// Passed into the control loop as an explicit collaborator so tests can
/// substitute an in-memory coordinator.
#[async_trait::async_trait]
pub trait Coordinator: Send + Sync {
    /// Report liveness and capacity.
    async fn send_heartbeat(
        &self,
        node: &PeerAddress,
        capacity: u64,
        remaining: u64,
    ) -> Result<(), NetError>;

    /// Send the full inventory of locally held blocks.
    async fn block_report(&self, node: &PeerAddress, blocks: &[Block]) -> Result<(), NetError>;

    /// Announce blocks finalized since the previous announcement.
    async fn block_received(&self, node: &PeerAddress, blocks: &[Block]) -> Result<(), NetError>;

    /// Fetch the next instruction for this node.
    async fn get_pending_command(&self, node: &PeerAddress) -> Result<BlockCommand, NetError>;

    /// Report a problem executing an instruction.
    async fn error_report(&self, node: &PeerAddress, message: &str) -> Result<(), NetError>;
}
