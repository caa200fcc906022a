//! Storage node configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default port of the Client interface.
pub const DEFAULT_CLIENT_PORT: u16 = 7000;

/// Default port of the Command interface.
pub const DEFAULT_COMMAND_PORT: u16 = 7001;

/// Chunk size used when pulling a file from a peer (1 MiB).
pub const DEFAULT_COPY_CHUNK_SIZE: u64 = 1024 * 1024;

/// Settings of a storage node. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local directory holding the files.
    pub root: PathBuf,
    /// Bind address of the Client interface.
    pub client_addr: SocketAddr,
    /// Bind address of the Command interface.
    pub command_addr: SocketAddr,
    /// Address other hosts use to reach this node; replaces an
    /// unspecified bind address when registering.
    pub public_ip: IpAddr,
    /// Registration interface of the naming node.
    pub naming_addr: SocketAddr,
    /// Bytes per read when copying from a peer.
    pub copy_chunk_size: u64,
    /// Timeout for connecting to the naming node and to peers.
    pub connect_timeout_ms: u64,
    /// Timeout for responses from the naming node and peers.
    pub response_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/hierfs/storage"),
            client_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CLIENT_PORT)),
            command_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_COMMAND_PORT)),
            public_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            naming_addr: SocketAddr::from(([127, 0, 0, 1], 6001)),
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
            connect_timeout_ms: 5_000,
            response_timeout_ms: 60_000,
        }
    }
}

impl StorageConfig {
    /// Loads a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: StorageConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.copy_chunk_size == 0 {
            anyhow::bail!("copy_chunk_size must be positive");
        }
        if self.client_addr == self.command_addr && self.client_addr.port() != 0 {
            anyhow::bail!("client and command interfaces cannot share {}", self.client_addr);
        }
        if self.public_ip.is_unspecified() {
            anyhow::bail!("public_ip must be a routable address");
        }
        Ok(())
    }

    /// Address to announce for a bound socket.
    pub fn advertised(&self, bound: SocketAddr) -> SocketAddr {
        if bound.ip().is_unspecified() {
            SocketAddr::new(self.public_ip, bound.port())
        } else {
            bound
        }
    }
}
