//! Shared types and protocol constants for ndfs.
//!
//! This crate defines the vocabulary shared by every other crate in the
//! workspace: block identity ([`BlockId`], [`Block`]), peer addressing
//! ([`PeerAddress`]), coordinator instructions ([`BlockCommand`]) and the
//! data-plane constants ([`OpCode`], [`Encoding`], [`WRITE_COMPLETE`]).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Marker returned to the upstream sender once a block write has completed.
pub const WRITE_COMPLETE: i64 = 0xcafe;

/// Upper bound on the number of hops a single write request may carry.
pub const MAX_TARGETS: usize = 64;

/// Default interval between heartbeats sent to the coordinator.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Default interval between full block reports.
pub const BLOCK_REPORT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// First data-plane port tried when none is configured.
pub const DEFAULT_DATA_PORT: u16 = 7000;

/// Opcode carried in the first byte of every data-plane connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Receive a block (and mirror it down the replica chain).
    WriteBlock = 80,
    /// Serve a block from the start.
    ReadBlock = 81,
    /// Serve a block after skipping a byte offset.
    ReadSkipBlock = 82,
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            80 => Ok(Self::WriteBlock),
            81 => Ok(Self::ReadBlock),
            82 => Ok(Self::ReadSkipBlock),
            other => Err(other),
        }
    }
}

/// How the payload of a write request is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Encoding {
    /// A single declared length followed by exactly that many bytes.
    RunLength = 0,
    /// Repeated `(length, bytes)` chunks terminated by a zero-length chunk.
    Chunked = 1,
}

impl TryFrom<u8> for Encoding {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::RunLength),
            1 => Ok(Self::Chunked),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// Coordinator-assigned identifier of a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlockId(i64);

impl BlockId {
    /// Wrap a raw block id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Return the raw id.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// File name used for this block on disk.
    pub fn file_name(self) -> String {
        self.to_string()
    }

    /// Parse a `blk_<id>` file name back into an id.
    pub fn from_file_name(name: &str) -> Option<Self> {
        name.strip_prefix("blk_")?.parse().ok().map(Self)
    }
}

impl From<i64> for BlockId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk_{}", self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

/// A block together with its length.
///
/// For finalized blocks `len` is the stored length. In a write header it is
/// only what the sender announced; the receiver records what actually arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Block identifier.
    pub id: BlockId,
    /// Length in bytes.
    pub len: u64,
}

impl Block {
    /// Create a block descriptor.
    pub fn new(id: impl Into<BlockId>, len: u64) -> Self {
        Self { id: id.into(), len }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.id, self.len)
    }
}

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

/// A connectable data-plane endpoint plus an opaque display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Host name or IP literal.
    pub host: String,
    /// Data-plane port.
    pub port: u16,
    /// Display name, not interpreted by the node.
    pub name: String,
}

impl PeerAddress {
    /// Build an address whose display name is `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let name = format!("{host}:{port}");
        Self { host, port, name }
    }

    /// Override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.endpoint())
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Error parsing a `host:port` string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    /// No `:` separator present.
    #[error("not a host:port pair: {0}")]
    MissingPort(String),
    /// The port is not a valid `u16`.
    #[error("invalid port in {0}")]
    InvalidPort(String),
}

impl FromStr for PeerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressParseError::MissingPort(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

// ---------------------------------------------------------------------------
// Coordinator commands
// ---------------------------------------------------------------------------

/// Work the coordinator hands to a node on each poll.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockCommand {
    /// Replicate `blocks[i]` to the ordered chain `targets[i]`.
    Transfer {
        /// Blocks to replicate.
        blocks: Vec<Block>,
        /// One target chain per block.
        targets: Vec<Vec<PeerAddress>>,
    },
    /// Delete these blocks locally.
    Invalidate {
        /// Obsolete blocks.
        blocks: Vec<Block>,
    },
    /// Nothing to do this cycle.
    #[default]
    NoOp,
}

impl BlockCommand {
    /// Pair each transfer block with its target chain.
    ///
    /// Blocks without a matching chain get an empty one.
    pub fn transfers(&self) -> Vec<(Block, Vec<PeerAddress>)> {
        match self {
            Self::Transfer { blocks, targets } => blocks
                .iter()
                .enumerate()
                .map(|(i, b)| (*b, targets.get(i).cloned().unwrap_or_default()))
                .collect(),
            _ => Vec::new(),
        }
    }
}
