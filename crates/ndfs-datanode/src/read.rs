//! Read handler.

use std::io::ErrorKind;
use std::net::SocketAddr;

use ndfs_net::NetError;
use ndfs_net::protocol::{self, INVALID_BLOCK_LEN, ReadRequest};
use ndfs_store::{BlockReader, BlockStore, StoreError};
use ndfs_types::{BlockId, OpCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::DataNodeError;
use crate::server::NodeContext;

/// Handle a `READ_BLOCK` or `READSKIP_BLOCK` request whose opcode has been consumed.
///
/// A reader that goes away mid-stream is not an error of this node.
pub(crate) async fn serve_block<S>(
    stream: &mut S,
    peer: SocketAddr,
    ctx: &NodeContext,
    op: OpCode,
) -> Result<(), DataNodeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request = ReadRequest::read_from(stream, op).await?;
    match send_block(stream, ctx, request).await {
        Ok(Some(sent)) => {
            debug!(%peer, block = %request.block, sent, "served block");
            Ok(())
        }
        Ok(None) => {
            debug!(%peer, block = %request.block, "read of invalid block");
            Ok(())
        }
        Err(e) if is_disconnect(&e) => {
            debug!(%peer, block = %request.block, %e, "reader disconnected");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Write the response. Returns the payload bytes sent, or `None` for an invalid block.
async fn send_block<S>(
    stream: &mut S,
    ctx: &NodeContext,
    request: ReadRequest,
) -> Result<Option<u64>, DataNodeError>
where
    S: AsyncWrite + Unpin,
{
    let Some((len, reader)) = lookup(ctx.store.as_ref(), request.block).await? else {
        stream.write_i64(INVALID_BLOCK_LEN).await?;
        stream.flush().await?;
        return Ok(None);
    };

    protocol::write_len(stream, len).await?;
    let mut reader = reader.take(len);
    if let Some(skip) = request.skip {
        let skipped = skip.min(len);
        protocol::write_len(stream, skipped).await?;
        tokio::io::copy(&mut (&mut reader).take(skipped), &mut tokio::io::sink()).await?;
    }

    let sent = tokio::io::copy(&mut reader, stream).await?;
    stream.flush().await?;

    let expected = len - request.skip.map_or(0, |s| s.min(len));
    if sent < expected {
        return Err(DataNodeError::ShortBlock {
            block: request.block,
            expected,
            actual: sent,
        });
    }
    Ok(Some(sent))
}

/// Open a block together with its length, mapping an invalid block to `None`.
async fn lookup(
    store: &dyn BlockStore,
    id: BlockId,
) -> Result<Option<(u64, BlockReader)>, StoreError> {
    let reader = match store.open_for_read(id).await {
        Ok(reader) => reader,
        Err(StoreError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    match store.length(id).await {
        Ok(len) => Ok(Some((len, reader))),
        // Invalidated between the two calls.
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn is_disconnect(err: &DataNodeError) -> bool {
    let io = match err {
        DataNodeError::Io(e) | DataNodeError::Net(NetError::Io(e)) => e,
        _ => return false,
    };
    matches!(
        io.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
    )
}
