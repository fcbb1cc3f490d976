//! Data-plane client helpers.
//!
//! Used by the command-line tools and by tests to write a block into a
//! replica chain or read one back.

use ndfs_types::{Block, BlockId, Encoding, PeerAddress};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::NetError;
use crate::protocol::{self, ReadRequest, WriteHeader};

/// Reply to a read request for a valid block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// Stored length of the block.
    pub len: u64,
    /// Bytes skipped before the payload (0 for plain reads).
    pub skipped: u64,
    /// Payload after the skipped prefix.
    pub data: Vec<u8>,
}

/// Open a data-plane connection to `peer`.
pub async fn connect(peer: &PeerAddress) -> Result<TcpStream, NetError> {
    let addr = peer.endpoint();
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| NetError::Connect { addr, source })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Write `data` as block `id` through the replica chain `targets`.
///
/// Connects to `targets[0]`, which mirrors down the rest of the chain.
/// With [`Encoding::Chunked`] the payload is split into `chunk_size` pieces.
/// Returns once the first hop acknowledges completion.
pub async fn write_block(
    targets: &[PeerAddress],
    id: BlockId,
    data: &[u8],
    encoding: Encoding,
    chunk_size: usize,
) -> Result<(), NetError> {
    let first = targets.first().ok_or(NetError::NoTargets)?;
    let mut stream = BufStream::new(connect(first).await?);

    let chunks: Vec<&[u8]> = match encoding {
        Encoding::RunLength => vec![data],
        Encoding::Chunked => data.chunks(chunk_size.max(1)).collect(),
    };
    let first_len = chunks.first().map_or(0, |c| c.len() as u64);

    WriteHeader {
        block: Block::new(id, data.len() as u64),
        targets: targets.to_vec(),
        encoding,
        first_len,
    }
    .write_to(&mut stream)
    .await?;

    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            protocol::write_len(&mut stream, chunk.len() as u64).await?;
        }
        stream.write_all(chunk).await?;
    }
    if encoding == Encoding::Chunked {
        protocol::write_len(&mut stream, 0).await?;
    }
    stream.flush().await?;

    protocol::read_completion(&mut stream).await?;
    debug!(block = %id, len = data.len(), target = %first, "block write acknowledged");
    Ok(())
}

/// Read block `id` from `peer`, optionally skipping a prefix.
///
/// Returns `None` when the peer reports the block as invalid.
pub async fn read_block(
    peer: &PeerAddress,
    id: BlockId,
    skip: Option<u64>,
) -> Result<Option<ReadResponse>, NetError> {
    let mut stream = BufStream::new(connect(peer).await?);
    ReadRequest { block: id, skip }.write_to(&mut stream).await?;
    stream.flush().await?;

    let len = stream.read_i64().await?;
    if len == protocol::INVALID_BLOCK_LEN {
        return Ok(None);
    }
    let len = u64::try_from(len).map_err(|_| NetError::NegativeLength(len))?;
    let skipped = match skip {
        Some(_) => protocol::read_len(&mut stream).await?,
        None => 0,
    };

    let mut data = Vec::with_capacity(len.saturating_sub(skipped) as usize);
    stream.read_to_end(&mut data).await?;
    Ok(Some(ReadResponse { len, skipped, data }))
}
