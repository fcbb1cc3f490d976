//! Error types for the data node.

use ndfs_types::BlockId;

/// Errors that can occur while handling connections or running the control loop.
#[derive(Debug, thiserror::Error)]
pub enum DataNodeError {
    /// Local block storage failed.
    #[error("store error: {0}")]
    Store(#[from] ndfs_store::StoreError),

    /// Wire protocol or coordinator RPC failed.
    #[error("network error: {0}")]
    Net(#[from] ndfs_net::NetError),

    /// Socket I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No port in the search range could be bound.
    #[error("could not bind {host} on ports {first}..={last}: {source}")]
    Bind {
        /// Host that was bound.
        host: String,
        /// First port tried.
        first: u16,
        /// Last port tried.
        last: u16,
        /// Error from the last attempt.
        source: std::io::Error,
    },

    /// A local block ended before its recorded length.
    #[error("block {block} is short: expected {expected} bytes, read {actual}")]
    ShortBlock {
        /// The block being read.
        block: BlockId,
        /// Recorded length.
        expected: u64,
        /// Bytes actually read.
        actual: u64,
    },
}
