//! Naming node configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_REPLICATION_THRESHOLD;

/// Default port of the Service interface.
pub const DEFAULT_SERVICE_PORT: u16 = 6000;

/// Default port of the Registration interface.
pub const DEFAULT_REGISTRATION_PORT: u16 = 6001;

/// Settings of a naming node. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Address of the client-facing Service interface.
    pub service_addr: SocketAddr,
    /// Address of the storage-facing Registration interface.
    pub registration_addr: SocketAddr,
    /// Accesses of a file between two replications.
    pub replication_threshold: u32,
    /// Timeout for connecting to storage nodes.
    pub connect_timeout_ms: u64,
    /// Timeout for storage node commands (create, delete, copy).
    pub storage_timeout_ms: u64,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            service_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_SERVICE_PORT)),
            registration_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_REGISTRATION_PORT)),
            replication_threshold: DEFAULT_REPLICATION_THRESHOLD,
            connect_timeout_ms: 5_000,
            storage_timeout_ms: 60_000,
        }
    }
}

impl NamingConfig {
    /// Loads a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: NamingConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.replication_threshold == 0 {
            anyhow::bail!("replication_threshold must be at least 1");
        }
        if self.service_addr == self.registration_addr && self.service_addr.port() != 0 {
            anyhow::bail!(
                "service and registration interfaces cannot share {}",
                self.service_addr
            );
        }
        if self.connect_timeout_ms == 0 || self.storage_timeout_ms == 0 {
            anyhow::bail!("timeouts must be positive");
        }
        Ok(())
    }
}
