//! Data node assembly.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ndfs_net::Coordinator;
use ndfs_store::BlockStore;
use ndfs_types::{DEFAULT_DATA_PORT, PeerAddress};
use tracing::info;

use crate::control::{ControlConfig, ControlLoop};
use crate::error::DataNodeError;
use crate::received::ReceivedBlocks;
use crate::server::{DataServer, NodeContext};

/// Configuration for a [`DataNode`].
#[derive(Debug, Clone)]
pub struct DataNodeConfig {
    /// Interface the data server binds.
    pub listen_host: String,
    /// First port tried.
    pub listen_port: u16,
    /// How many consecutive ports to try when the first is in use.
    pub port_search: u16,
    /// Host name advertised to the coordinator and to peers.
    pub hostname: String,
    /// Control loop timing and buffer size.
    pub control: ControlConfig,
    /// Pause before restarting the control loop after losing the coordinator.
    pub retry_backoff: Duration,
}

impl Default for DataNodeConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_DATA_PORT,
            port_search: 100,
            hostname: "localhost".to_string(),
            control: ControlConfig::default(),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// A bound data node: listener plus control loop, not yet running.
pub struct DataNode {
    server: DataServer,
    address: PeerAddress,
    local_addr: SocketAddr,
    store: Arc<dyn BlockStore>,
    received: Arc<ReceivedBlocks>,
    config: DataNodeConfig,
}

impl DataNode {
    /// Bind the data server. Fails only if no port in the search range is free.
    pub async fn bind(
        config: DataNodeConfig,
        store: Arc<dyn BlockStore>,
    ) -> Result<Self, DataNodeError> {
        let received = Arc::new(ReceivedBlocks::new());
        let ctx = Arc::new(NodeContext::new(
            store.clone(),
            received.clone(),
            config.control.buffer_size,
        ));
        let server = DataServer::bind(
            &config.listen_host,
            config.listen_port,
            config.port_search,
            ctx,
        )
        .await?;
        let local_addr = server.local_addr()?;
        let address = PeerAddress::new(config.hostname.clone(), local_addr.port());

        Ok(Self {
            server,
            address,
            local_addr,
            store,
            received,
            config,
        })
    }

    /// Address this node advertises.
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Socket address the data server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue of blocks awaiting a `blockReceived` report.
    pub fn received(&self) -> &Arc<ReceivedBlocks> {
        &self.received
    }

    /// Serve connections and run the supervised control loop until `shutdown` completes.
    pub async fn run(self, coordinator: Arc<dyn Coordinator>, shutdown: impl Future<Output = ()>) {
        info!(node = %self.address, addr = %self.local_addr, "data node starting");
        let control = ControlLoop::new(
            self.address.clone(),
            self.store,
            coordinator,
            self.received,
            self.config.control,
        );
        let control = tokio::spawn(control.run_supervised(self.config.retry_backoff));

        self.server.serve(shutdown).await;
        control.abort();
        info!(node = %self.address, "data node stopped");
    }
}
