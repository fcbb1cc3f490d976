//! Coordinator RPC over TCP.
//!
//! Every request is a 4-byte big-endian length followed by a postcard-encoded
//! [`CoordinatorRequest`]; the coordinator answers with one frame holding a
//! [`CoordinatorResponse`].

use ndfs_types::{Block, BlockCommand, PeerAddress};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Coordinator;
use crate::error::NetError;
use crate::message::{CoordinatorRequest, CoordinatorResponse};

/// Maximum RPC frame size: 64 MB. A block report for a large node is the
/// biggest message on this channel.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Write one length-prefixed postcard frame.
pub async fn send_frame<W, T>(w: &mut W, msg: &T) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = postcard::to_allocvec(msg).map_err(|e| NetError::Serialization(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(payload.len()));
    }
    w.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    w.write_all(&payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one length-prefixed postcard frame.
pub async fn recv_frame<R, T>(r: &mut R) -> Result<T, NetError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    postcard::from_bytes(&buf).map_err(|e| NetError::Serialization(e.to_string()))
}

/// [`Coordinator`] implementation speaking framed postcard over TCP.
///
/// Holds a single connection, established on first use. Any failure drops
/// the connection; the next call dials again.
pub struct RpcCoordinator {
    addr: String,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl RpcCoordinator {
    /// Create a client for the coordinator at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    /// Address of the coordinator.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, request: CoordinatorRequest) -> Result<CoordinatorResponse, NetError> {
        // The lock is held for the whole exchange so responses cannot interleave.
        let mut guard = self.conn.lock().await;
        let stream = match guard.as_mut() {
            Some(stream) => stream,
            None => {
                debug!(addr = %self.addr, "connecting to coordinator");
                let stream = TcpStream::connect(&self.addr)
                    .await
                    .map_err(|source| NetError::Connect {
                        addr: self.addr.clone(),
                        source,
                    })?;
                stream.set_nodelay(true)?;
                guard.insert(BufStream::new(stream))
            }
        };

        let result = match send_frame(&mut *stream, &request).await {
            Ok(()) => recv_frame::<_, CoordinatorResponse>(&mut *stream).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(CoordinatorResponse::Error(message)) => Err(NetError::Remote(message)),
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(addr = %self.addr, %e, "coordinator call failed, dropping connection");
                *guard = None;
                Err(e)
            }
        }
    }

    async fn call_ack(&self, request: CoordinatorRequest) -> Result<(), NetError> {
        match self.call(request).await? {
            CoordinatorResponse::Ack => Ok(()),
            other => Err(NetError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

#[async_trait::async_trait]
impl Coordinator for RpcCoordinator {
    async fn send_heartbeat(
        &self,
        node: &PeerAddress,
        capacity: u64,
        remaining: u64,
    ) -> Result<(), NetError> {
        self.call_ack(CoordinatorRequest::Heartbeat {
            node: node.clone(),
            capacity,
            remaining,
        })
        .await
    }

    async fn block_report(&self, node: &PeerAddress, blocks: &[Block]) -> Result<(), NetError> {
        self.call_ack(CoordinatorRequest::BlockReport {
            node: node.clone(),
            blocks: blocks.to_vec(),
        })
        .await
    }

    async fn block_received(&self, node: &PeerAddress, blocks: &[Block]) -> Result<(), NetError> {
        self.call_ack(CoordinatorRequest::BlockReceived {
            node: node.clone(),
            blocks: blocks.to_vec(),
        })
        .await
    }

    async fn get_pending_command(&self, node: &PeerAddress) -> Result<BlockCommand, NetError> {
        match self
            .call(CoordinatorRequest::GetCommand { node: node.clone() })
            .await?
        {
            CoordinatorResponse::Command(cmd) => Ok(cmd),
            other => Err(NetError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn error_report(&self, node: &PeerAddress, message: &str) -> Result<(), NetError> {
        self.call_ack(CoordinatorRequest::ErrorReport {
            node: node.clone(),
            message: message.to_string(),
        })
        .await
    }
}
