//! Data-plane wire format.
//!
//! One request per connection. The first byte is an [`OpCode`]; everything
//! after it is big-endian:
//!
//! ```text
//! WRITE_BLOCK    block | i32 n | n × peer | u8 encoding | i64 len | payload
//!                -> i64 WRITE_COMPLETE
//! READ_BLOCK     block                  -> i64 len (-1 if invalid) | bytes
//! READSKIP_BLOCK block | i64 skip       -> i64 len | i64 skipped | bytes
//!
//! block  = i64 id | i64 len
//! peer   = string host | u16 port | string name
//! string = u16 byte length | utf-8
//! ```
//!
//! Run-length payloads are exactly `len` bytes. Chunked payloads are the
//! first `len` bytes followed by repeated `i64 len | bytes` chunks, ending
//! with a zero-length chunk.

use ndfs_types::{Block, BlockId, Encoding, MAX_TARGETS, OpCode, PeerAddress, WRITE_COMPLETE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;

/// Length sentinel sent in reply to a read of an invalid block.
pub const INVALID_BLOCK_LEN: i64 = -1;

/// Read a non-negative `i64` length.
pub async fn read_len<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64, NetError> {
    let len = r.read_i64().await?;
    u64::try_from(len).map_err(|_| NetError::NegativeLength(len))
}

/// Write a length as `i64`.
pub async fn write_len<W: AsyncWrite + Unpin>(w: &mut W, len: u64) -> Result<(), NetError> {
    let len = i64::try_from(len).map_err(|_| NetError::LengthOverflow(len))?;
    w.write_i64(len).await?;
    Ok(())
}

/// Read a `u16`-prefixed UTF-8 string.
pub async fn read_string<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, NetError> {
    let len = r.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| NetError::InvalidUtf8)
}

/// Write a `u16`-prefixed UTF-8 string.
pub async fn write_string<W: AsyncWrite + Unpin>(w: &mut W, s: &str) -> Result<(), NetError> {
    let len = u16::try_from(s.len()).map_err(|_| NetError::StringTooLong(s.len()))?;
    w.write_u16(len).await?;
    w.write_all(s.as_bytes()).await?;
    Ok(())
}

/// Read a block descriptor.
pub async fn read_block<R: AsyncRead + Unpin>(r: &mut R) -> Result<Block, NetError> {
    let id = BlockId::new(r.read_i64().await?);
    let len = read_len(r).await?;
    Ok(Block { id, len })
}

/// Write a block descriptor.
pub async fn write_block<W: AsyncWrite + Unpin>(w: &mut W, block: &Block) -> Result<(), NetError> {
    w.write_i64(block.id.get()).await?;
    write_len(w, block.len).await
}

/// Read a peer address.
pub async fn read_peer<R: AsyncRead + Unpin>(r: &mut R) -> Result<PeerAddress, NetError> {
    let host = read_string(r).await?;
    let port = r.read_u16().await?;
    let name = read_string(r).await?;
    Ok(PeerAddress { host, port, name })
}

/// Write a peer address.
pub async fn write_peer<W: AsyncWrite + Unpin>(
    w: &mut W,
    peer: &PeerAddress,
) -> Result<(), NetError> {
    write_string(w, &peer.host).await?;
    w.write_u16(peer.port).await?;
    write_string(w, &peer.name).await
}

/// Read the opcode byte that opens every connection.
pub async fn read_opcode<R: AsyncRead + Unpin>(r: &mut R) -> Result<OpCode, NetError> {
    let op = r.read_u8().await?;
    OpCode::try_from(op).map_err(NetError::UnknownOpcode)
}

/// Read the completion marker a receiver sends after a write.
pub async fn read_completion<R: AsyncRead + Unpin>(r: &mut R) -> Result<(), NetError> {
    match r.read_i64().await? {
        WRITE_COMPLETE => Ok(()),
        other => Err(NetError::UnexpectedCompletion(other)),
    }
}

/// Write the completion marker.
pub async fn write_completion<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), NetError> {
    w.write_i64(WRITE_COMPLETE).await?;
    Ok(())
}

/// Header of a `WRITE_BLOCK` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteHeader {
    /// Block being written.
    pub block: Block,
    /// Replica chain; index 0 is the receiving node.
    pub targets: Vec<PeerAddress>,
    /// Payload framing.
    pub encoding: Encoding,
    /// Total length (run-length) or first chunk length (chunked).
    pub first_len: u64,
}

impl WriteHeader {
    /// Read a header; the opcode byte must already have been consumed.
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, NetError> {
        let block = read_block(r).await?;

        let count = r.read_i32().await?;
        if count <= 0 || count as usize > MAX_TARGETS {
            return Err(NetError::InvalidTargetCount(count));
        }
        let mut targets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            targets.push(read_peer(r).await?);
        }

        let encoding = r.read_u8().await?;
        let encoding = Encoding::try_from(encoding).map_err(NetError::UnknownEncoding)?;
        let first_len = read_len(r).await?;

        Ok(Self {
            block,
            targets,
            encoding,
            first_len,
        })
    }

    /// Write the opcode byte followed by the header.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<(), NetError> {
        if self.targets.is_empty() {
            return Err(NetError::NoTargets);
        }
        if self.targets.len() > MAX_TARGETS {
            return Err(NetError::InvalidTargetCount(self.targets.len() as i32));
        }
        w.write_u8(OpCode::WriteBlock as u8).await?;
        write_block(w, &self.block).await?;
        w.write_i32(self.targets.len() as i32).await?;
        for peer in &self.targets {
            write_peer(w, peer).await?;
        }
        w.write_u8(self.encoding as u8).await?;
        write_len(w, self.first_len).await
    }

    /// The next hop and the header to send it, with this node shifted off the chain.
    pub fn next_hop(&self) -> Option<(&PeerAddress, WriteHeader)> {
        let next = self.targets.get(1)?;
        let header = WriteHeader {
            block: self.block,
            targets: self.targets[1..].to_vec(),
            encoding: self.encoding,
            first_len: self.first_len,
        };
        Some((next, header))
    }
}

/// A `READ_BLOCK` or `READSKIP_BLOCK` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Block to serve.
    pub block: BlockId,
    /// Requested skip; `Some` selects the skip variant.
    pub skip: Option<u64>,
}

impl ReadRequest {
    /// Read the request body for `op`; the opcode byte must already have been consumed.
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R, op: OpCode) -> Result<Self, NetError> {
        let block = read_block(r).await?;
        let skip = match op {
            // A negative skip is treated as no skip.
            OpCode::ReadSkipBlock => Some(r.read_i64().await?.max(0) as u64),
            _ => None,
        };
        Ok(Self {
            block: block.id,
            skip,
        })
    }

    /// Write the opcode byte followed by the request.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<(), NetError> {
        let op = match self.skip {
            Some(_) => OpCode::ReadSkipBlock,
            None => OpCode::ReadBlock,
        };
        w.write_u8(op as u8).await?;
        write_block(w, &Block::new(self.block, 0)).await?;
        if let Some(skip) = self.skip {
            write_len(w, skip).await?;
        }
        Ok(())
    }
}
