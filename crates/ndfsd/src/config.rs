//! TOML configuration for the ndfs daemon.
//!
//! Every section and key is optional. Missing values fall back to the
//! defaults below; command-line flags override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ndfs_datanode::{ControlConfig, DataNodeConfig};
use ndfs_types::{BLOCK_REPORT_INTERVAL, DEFAULT_DATA_PORT, HEARTBEAT_INTERVAL};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity, storage directory and listener.
    pub node: NodeSection,
    /// Coordinator endpoint and reporting cadence.
    pub coordinator: CoordinatorSection,
    /// Block storage backend.
    pub storage: StorageSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory holding block files.
    pub data_dir: PathBuf,
    /// Interface the data server binds.
    pub listen_host: String,
    /// First data port tried.
    pub listen_port: u16,
    /// Consecutive ports tried when the first is taken.
    pub port_search: u16,
    /// Host name advertised to the coordinator and peers.
    pub hostname: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".ndfs"))
            .unwrap_or_else(|| PathBuf::from(".ndfs"));
        Self {
            data_dir,
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_DATA_PORT,
            port_search: 100,
            hostname: "localhost".to_string(),
        }
    }
}

/// `[coordinator]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    /// Coordinator RPC address (`host:port`).
    pub addr: String,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: Option<u64>,
    /// Full block report interval in milliseconds.
    pub block_report_interval_ms: Option<u64>,
    /// Pause before reconnecting after the coordinator is lost, in milliseconds.
    pub retry_backoff_ms: Option<u64>,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9000".to_string(),
            heartbeat_interval_ms: None,
            block_report_interval_ms: None,
            retry_backoff_ms: None,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
    /// Per-connection I/O buffer size in bytes.
    pub buffer_size: Option<usize>,
    /// Byte limit of the memory backend.
    pub memory_max_bytes: Option<u64>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            buffer_size: None,
            memory_max_bytes: None,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Whether blocks are kept in RAM only.
    pub fn memory_mode(&self) -> bool {
        self.storage.backend == "memory"
    }

    /// Effective heartbeat interval (3 s default).
    pub fn heartbeat_interval(&self) -> Duration {
        self.coordinator
            .heartbeat_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(HEARTBEAT_INTERVAL)
    }

    /// Effective block report interval (1 h default).
    pub fn block_report_interval(&self) -> Duration {
        self.coordinator
            .block_report_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(BLOCK_REPORT_INTERVAL)
    }

    /// Effective reconnect backoff (5 s default).
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.coordinator.retry_backoff_ms.unwrap_or(5000))
    }

    /// Effective per-connection buffer size (4 KB default).
    pub fn buffer_size(&self) -> usize {
        self.storage.buffer_size.unwrap_or(4096).max(1)
    }

    /// Effective memory backend limit (1 GB default).
    pub fn memory_max_bytes(&self) -> u64 {
        self.storage.memory_max_bytes.unwrap_or(1 << 30)
    }

    /// Data node settings derived from this config.
    pub fn datanode_config(&self) -> DataNodeConfig {
        DataNodeConfig {
            listen_host: self.node.listen_host.clone(),
            listen_port: self.node.listen_port,
            port_search: self.node.port_search,
            hostname: self.node.hostname.clone(),
            control: ControlConfig {
                heartbeat_interval: self.heartbeat_interval(),
                block_report_interval: self.block_report_interval(),
                buffer_size: self.buffer_size(),
            },
            retry_backoff: self.retry_backoff(),
        }
    }
}
