//! Data-plane connection listener.
//!
//! [`DataServer`] accepts TCP connections and hands each one to its own
//! task. Handlers share nothing but the block store and the received-block
//! queue, so a stalled client only ties up its own task.

use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ndfs_net::protocol;
use ndfs_store::BlockStore;
use ndfs_types::OpCode;
use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::DataNodeError;
use crate::received::ReceivedBlocks;
use crate::{read, write_pipeline};

/// State shared by every connection handler.
pub struct NodeContext {
    /// Local block storage.
    pub store: Arc<dyn BlockStore>,
    /// Blocks finalized since the last report.
    pub received: Arc<ReceivedBlocks>,
    /// Per-connection I/O buffer size.
    pub buffer_size: usize,
}

impl NodeContext {
    /// Create a context.
    pub fn new(
        store: Arc<dyn BlockStore>,
        received: Arc<ReceivedBlocks>,
        buffer_size: usize,
    ) -> Self {
        Self {
            store,
            received,
            buffer_size: buffer_size.max(1),
        }
    }
}

/// Listening data-plane server.
pub struct DataServer {
    listener: TcpListener,
    ctx: Arc<NodeContext>,
}

impl DataServer {
    /// Bind `host:port`, moving on to the next port while the current one is in use.
    ///
    /// At most `attempts` ports are tried. Port 0 lets the OS pick and is tried once.
    pub async fn bind(
        host: &str,
        port: u16,
        attempts: u16,
        ctx: Arc<NodeContext>,
    ) -> Result<Self, DataNodeError> {
        let attempts = if port == 0 { 1 } else { attempts.max(1) };
        let mut current = port;
        let mut tried = 0u16;

        loop {
            match TcpListener::bind((host, current)).await {
                Ok(listener) => {
                    info!(host, port = current, "opened data server");
                    return Ok(Self { listener, ctx });
                }
                Err(e) => {
                    tried += 1;
                    let next = current.checked_add(1);
                    if e.kind() != ErrorKind::AddrInUse || tried >= attempts || next.is_none() {
                        return Err(DataNodeError::Bind {
                            host: host.to_string(),
                            first: port,
                            last: current,
                            source: e,
                        });
                    }
                    info!(host, port = current, "could not open data server, trying next port");
                    current = next.unwrap_or(current);
                }
            }
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// On shutdown the listener is closed and every live handler is aborted;
    /// blocks they were writing stay unfinalized.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) {
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = self.ctx.clone();
                        handlers.spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, ctx).await {
                                warn!(%peer, %e, "data connection aborted");
                            }
                        });
                    }
                    Err(e) => {
                        // Usually descriptor exhaustion; back off briefly and keep accepting.
                        error!(%e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            }
        }

        info!(live = handlers.len(), "data server shutting down");
        handlers.shutdown().await;
    }
}

/// Serve one data-plane request.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<NodeContext>,
) -> Result<(), DataNodeError> {
    stream.set_nodelay(true)?;
    let mut stream = BufStream::with_capacity(ctx.buffer_size, ctx.buffer_size, stream);
    dispatch(&mut stream, peer, &ctx).await
}

/// Read the opcode and run the matching handler.
pub(crate) async fn dispatch<S>(
    stream: &mut S,
    peer: SocketAddr,
    ctx: &NodeContext,
) -> Result<(), DataNodeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let op = protocol::read_opcode(stream).await?;
    debug!(%peer, ?op, "data request");
    match op {
        OpCode::WriteBlock => {
            write_pipeline::receive_block(stream, peer, ctx).await?;
        }
        OpCode::ReadBlock | OpCode::ReadSkipBlock => {
            read::serve_block(stream, peer, ctx, op).await?;
        }
    }
    Ok(())
}
