//! `ndfsd`: the ndfs data node daemon.
//!
//! Runs a data node, and doubles as a small client for the data-plane
//! protocol.
//!
//! # Usage
//!
//! ```text
//! ndfsd start                                    # start a node
//! ndfsd start -c ndfs.toml                       # start with a config file
//! ndfsd start -d ./node2 -p 7100 --memory        # second, volatile instance
//! ndfsd put --node host:7000 --block 42 --file data.bin --target host:7001
//! ndfsd get --node host:7000 --block 42 --skip 100 --output out.bin
//! ndfsd blocks -d ./node2                        # inventory of a stopped node
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ndfs_datanode::DataNode;
use ndfs_net::{RpcCoordinator, client};
use ndfs_store::{BlockStore, FileStore, MemoryStore};
use ndfs_types::{BlockId, Encoding, PeerAddress};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ndfsd", version, about = "ndfs block storage data node")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the data node.
    Start {
        /// Override data directory (useful for running multiple instances).
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Override the first data port tried.
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the advertised host name.
        #[arg(long)]
        hostname: Option<String>,

        /// Coordinator address (`host:port`).
        #[arg(long, env = "NDFS_COORDINATOR")]
        coordinator: Option<String>,

        /// Keep blocks in memory only.
        #[arg(short, long)]
        memory: bool,
    },

    /// Write a file as a block through a replica chain.
    Put {
        /// Node receiving the write (`host:port`).
        #[arg(short, long)]
        node: PeerAddress,

        /// Block id.
        #[arg(short, long, allow_negative_numbers = true)]
        block: i64,

        /// File holding the block content.
        #[arg(short, long)]
        file: PathBuf,

        /// Further replicas, in chain order. Can be specified multiple times.
        #[arg(short, long)]
        target: Vec<PeerAddress>,

        /// Send the payload as length-prefixed chunks.
        #[arg(long)]
        chunked: bool,

        /// Chunk size for `--chunked`.
        #[arg(long, default_value = "65536")]
        chunk_size: usize,
    },

    /// Read a block from a node.
    Get {
        /// Node to read from (`host:port`).
        #[arg(short, long)]
        node: PeerAddress,

        /// Block id.
        #[arg(short, long, allow_negative_numbers = true)]
        block: i64,

        /// Skip this many bytes from the start of the block.
        #[arg(short, long)]
        skip: Option<u64>,

        /// Write the payload here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the blocks and capacity of a data directory.
    Blocks {
        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start {
            data_dir,
            port,
            hostname,
            coordinator,
            memory,
        } => {
            // CLI args override config file values.
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if let Some(port) = port {
                config.node.listen_port = port;
            }
            if let Some(hostname) = hostname {
                config.node.hostname = hostname;
            }
            if let Some(addr) = coordinator {
                config.coordinator.addr = addr;
            }
            if memory {
                config.storage.backend = "memory".to_string();
            }
            cmd_start(config).await
        }
        Commands::Put {
            node,
            block,
            file,
            target,
            chunked,
            chunk_size,
        } => {
            let mut chain = vec![node];
            chain.extend(target);
            let encoding = if chunked {
                Encoding::Chunked
            } else {
                Encoding::RunLength
            };
            cmd_put(&chain, BlockId::new(block), &file, encoding, chunk_size).await
        }
        Commands::Get {
            node,
            block,
            skip,
            output,
        } => cmd_get(&node, BlockId::new(block), skip, output).await,
        Commands::Blocks { data_dir } => {
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            cmd_blocks(&config).await
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// -----------------------------------------------------------------------
// ndfsd start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting ndfsd");
    info!(
        data_dir = %config.node.data_dir.display(),
        backend = %config.storage.backend,
        coordinator = %config.coordinator.addr,
        listen_host = %config.node.listen_host,
        listen_port = config.node.listen_port,
        "node configuration"
    );

    let store = open_store(&config)?;
    let node = DataNode::bind(config.datanode_config(), store)
        .await
        .context("failed to start data server")?;
    info!(node = %node.address(), addr = %node.local_addr(), "data server listening");

    let coordinator = Arc::new(RpcCoordinator::new(config.coordinator.addr.clone()));
    node.run(coordinator, shutdown_signal()).await;
    Ok(())
}

fn open_store(config: &CliConfig) -> Result<Arc<dyn BlockStore>> {
    if config.memory_mode() {
        info!(max_bytes = config.memory_max_bytes(), "using in-memory block store");
        return Ok(Arc::new(MemoryStore::new(config.memory_max_bytes())));
    }
    std::fs::create_dir_all(&config.node.data_dir).context("failed to create data directory")?;
    let store = FileStore::new(&config.node.data_dir).with_context(|| {
        format!(
            "failed to open block store at {}",
            config.node.data_dir.display()
        )
    })?;
    store
        .recover()
        .context("failed to discard unfinalized blocks")?;
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, shutting down"),
        Err(e) => {
            error!(%e, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

// -----------------------------------------------------------------------
// ndfsd put / get / blocks
// -----------------------------------------------------------------------

async fn cmd_put(
    chain: &[PeerAddress],
    id: BlockId,
    file: &std::path::Path,
    encoding: Encoding,
    chunk_size: usize,
) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    client::write_block(chain, id, &data, encoding, chunk_size)
        .await
        .with_context(|| format!("failed to write {id} to {}", chain[0]))?;
    println!("wrote {id}: {} bytes, {} replica(s)", data.len(), chain.len());
    Ok(())
}

async fn cmd_get(
    node: &PeerAddress,
    id: BlockId,
    skip: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let Some(response) = client::read_block(node, id, skip)
        .await
        .with_context(|| format!("failed to read {id} from {node}"))?
    else {
        bail!("{id} is not valid on {node}");
    };

    match output {
        Some(path) => {
            tokio::fs::write(&path, &response.data)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "{id}: length {}, skipped {}, wrote {} bytes to {}",
                response.len,
                response.skipped,
                response.data.len(),
                path.display()
            );
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&response.data).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

async fn cmd_blocks(config: &CliConfig) -> Result<()> {
    let lines = inventory(config).await?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Render the inventory of the configured data directory.
///
/// Only finalized blocks are listed; blocks still being written are left alone.
async fn inventory(config: &CliConfig) -> Result<Vec<String>> {
    let dir = &config.node.data_dir;
    let store = FileStore::new(dir)
        .with_context(|| format!("failed to open block store at {}", dir.display()))?;

    let mut blocks = store.list_all().await.context("failed to list blocks")?;
    blocks.sort_by_key(|b| b.id);
    let capacity = store.capacity().await.context("failed to read capacity")?;

    let mut lines: Vec<String> = blocks
        .iter()
        .map(|b| format!("{}\t{}", b.id, b.len))
        .collect();
    lines.push(format!(
        "{} block(s), {} bytes; capacity {} bytes, {} available",
        blocks.len(),
        blocks.iter().map(|b| b.len).sum::<u64>(),
        capacity.total_bytes,
        capacity.available_bytes
    ));
    Ok(lines)
}
