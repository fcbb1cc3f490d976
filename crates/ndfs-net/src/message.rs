//! Coordinator RPC messages.
//!
//! Each request is sent as one length-prefixed postcard frame and answered
//! with exactly one response frame.

use ndfs_types::{Block, BlockCommand, PeerAddress};
use serde::{Deserialize, Serialize};

/// Node → coordinator request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorRequest {
    /// Liveness and capacity report.
    Heartbeat {
        /// Reporting node.
        node: PeerAddress,
        /// Total capacity in bytes.
        capacity: u64,
        /// Free bytes.
        remaining: u64,
    },
    /// Full block inventory.
    BlockReport {
        /// Reporting node.
        node: PeerAddress,
        /// Every finalized block.
        blocks: Vec<Block>,
    },
    /// Newly finalized blocks.
    BlockReceived {
        /// Reporting node.
        node: PeerAddress,
        /// Blocks finalized since the previous report.
        blocks: Vec<Block>,
    },
    /// Poll for pending work.
    GetCommand {
        /// Polling node.
        node: PeerAddress,
    },
    /// Problem executing an instruction.
    ErrorReport {
        /// Reporting node.
        node: PeerAddress,
        /// Human-readable description.
        message: String,
    },
}

/// Coordinator → node response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorResponse {
    /// Request accepted.
    Ack,
    /// Pending work (answer to [`CoordinatorRequest::GetCommand`]).
    Command(BlockCommand),
    /// Request rejected.
    Error(String),
}
