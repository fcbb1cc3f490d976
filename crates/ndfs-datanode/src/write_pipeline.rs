//! Write-pipeline handler.
//!
//! Receives a block from an upstream sender, persists it locally and mirrors
//! the same byte stream to the next node of the replica chain. The chain
//! shifts by one hop per node: this node is `targets[0]`, the mirror gets
//! `targets[1..]`.

use std::io::ErrorKind;
use std::net::SocketAddr;

use ndfs_net::NetError;
use ndfs_net::client;
use ndfs_net::protocol::{self, WriteHeader};
use ndfs_store::BlockWriter;
use ndfs_types::{Block, Encoding, PeerAddress};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::DataNodeError;
use crate::server::NodeContext;

/// Handle a `WRITE_BLOCK` request whose opcode has been consumed.
///
/// The upstream sender gets its completion marker only after the block is
/// finalized, queued for reporting and, when a mirror is active, acknowledged
/// downstream. Any error before finalize drops the open block.
pub(crate) async fn receive_block<S>(
    stream: &mut S,
    peer: SocketAddr,
    ctx: &NodeContext,
) -> Result<Block, DataNodeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let header = WriteHeader::read_from(stream).await?;
    let id = header.block.id;
    debug!(
        %peer,
        block = %id,
        hops = header.targets.len(),
        encoding = ?header.encoding,
        "receiving block"
    );

    let mut writer = ctx.store.create(id).await?;
    let mut mirror = MirrorStage::open(&header, ctx.buffer_size).await;
    let mut buf = vec![0u8; ctx.buffer_size];

    // The header length is only the first chunk; a chunked stream ends at the
    // first zero length that follows it, even when the first chunk was empty.
    copy_chunk(stream, header.first_len, &mut buf, writer.as_mut(), &mut mirror).await?;
    if header.encoding == Encoding::Chunked {
        loop {
            let len = protocol::read_len(stream).await?;
            mirror.forward_len(len).await;
            if len == 0 {
                break;
            }
            copy_chunk(stream, len, &mut buf, writer.as_mut(), &mut mirror).await?;
        }
    }

    let block = writer.finalize().await?;
    ctx.received.push(block);

    let mirrored = mirror.finish().await;
    protocol::write_completion(stream).await?;
    stream.flush().await?;

    info!(%peer, block = %block.id, len = block.len, mirrored, "received block");
    Ok(block)
}

/// Move exactly `len` payload bytes from upstream into the block and the mirror.
async fn copy_chunk<S>(
    stream: &mut S,
    len: u64,
    buf: &mut [u8],
    writer: &mut dyn BlockWriter,
    mirror: &mut MirrorStage,
) -> Result<(), DataNodeError>
where
    S: AsyncRead + Unpin,
{
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("upstream closed with {remaining} bytes outstanding"),
            )
            .into());
        }
        writer.append(&buf[..n]).await?;
        mirror.forward(&buf[..n]).await;
        remaining -= n as u64;
    }
    Ok(())
}

struct Hop {
    peer: PeerAddress,
    stream: BufStream<TcpStream>,
}

/// Outbound leg of the replica chain.
///
/// Owns the connection to the next hop, if there is one. Every failure on
/// that connection is logged and collapses the stage to a no-op, so a
/// downstream replica dropping out never fails the local write.
pub(crate) struct MirrorStage {
    next: Option<Hop>,
}

impl MirrorStage {
    /// A stage that forwards nothing.
    pub(crate) fn disabled() -> Self {
        Self { next: None }
    }

    /// Connect to the next hop named by `header` and send it the shifted header.
    pub(crate) async fn open(header: &WriteHeader, buffer_size: usize) -> Self {
        let Some((next, shifted)) = header.next_hop() else {
            return Self::disabled();
        };
        match Self::connect(next, &shifted, buffer_size).await {
            Ok(stream) => {
                debug!(block = %header.block.id, next = %next, "mirroring block");
                Self {
                    next: Some(Hop {
                        peer: next.clone(),
                        stream,
                    }),
                }
            }
            Err(e) => {
                warn!(block = %header.block.id, next = %next, %e, "mirror unavailable, writing locally only");
                Self::disabled()
            }
        }
    }

    async fn connect(
        next: &PeerAddress,
        header: &WriteHeader,
        buffer_size: usize,
    ) -> Result<BufStream<TcpStream>, NetError> {
        let stream = client::connect(next).await?;
        let mut stream = BufStream::with_capacity(buffer_size, buffer_size, stream);
        header.write_to(&mut stream).await?;
        Ok(stream)
    }

    /// Forward payload bytes verbatim.
    pub(crate) async fn forward(&mut self, data: &[u8]) {
        let Some(hop) = self.next.as_mut() else {
            return;
        };
        let result = hop.stream.write_all(data).await;
        if let Err(e) = result {
            self.fail(e.into());
        }
    }

    /// Forward a chunk length prefix.
    pub(crate) async fn forward_len(&mut self, len: u64) {
        let Some(hop) = self.next.as_mut() else {
            return;
        };
        let result = protocol::write_len(&mut hop.stream, len).await;
        if let Err(e) = result {
            self.fail(e);
        }
    }

    /// Flush the stream and wait for the next hop's completion marker.
    ///
    /// Returns whether the mirror acknowledged the block.
    pub(crate) async fn finish(&mut self) -> bool {
        let Some(hop) = self.next.as_mut() else {
            return false;
        };
        let acked = match hop.stream.flush().await {
            Ok(()) => protocol::read_completion(&mut hop.stream).await,
            Err(e) => Err(e.into()),
        };
        match acked {
            Ok(()) => {
                self.next = None;
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn fail(&mut self, e: NetError) {
        if let Some(hop) = self.next.take() {
            warn!(next = %hop.peer, %e, "mirror failed, continuing without it");
        }
    }
}
