//! Storage node join protocol.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::coordinator::LockCoordinator;
use crate::path::FsPath;
use crate::registry::{ReplicaRegistry, StorageNode};
use crate::storage::StorageConnector;
use crate::tree::{DirectoryTree, Graft};
use crate::types::{NamingError, Result, StorageEndpoint};

/// Merges a joining storage node's files into the tree and the registry.
pub struct RegistrationHandler {
    tree: Arc<DirectoryTree>,
    registry: Arc<ReplicaRegistry>,
    coordinator: Arc<LockCoordinator>,
    connector: Arc<dyn StorageConnector>,
}

impl RegistrationHandler {
    /// Creates a handler over shared state.
    pub fn new(
        tree: Arc<DirectoryTree>,
        registry: Arc<ReplicaRegistry>,
        coordinator: Arc<LockCoordinator>,
        connector: Arc<dyn StorageConnector>,
    ) -> Self {
        Self {
            tree,
            registry,
            coordinator,
            connector,
        }
    }

    /// Registers a storage node reporting `files`. Returns the reported
    /// paths that already exist; the node must delete its copies of them.
    ///
    /// Runs with root locked exclusively so that no other tree operation
    /// interleaves with the merge.
    pub async fn register(
        &self,
        client: Option<SocketAddr>,
        command: Option<SocketAddr>,
        files: Option<Vec<FsPath>>,
    ) -> Result<Vec<FsPath>> {
        let client = client.ok_or_else(|| NamingError::NullArgument("client".to_string()))?;
        let command = command.ok_or_else(|| NamingError::NullArgument("command".to_string()))?;
        let files = files.ok_or_else(|| NamingError::NullArgument("files".to_string()))?;
        let endpoint = StorageEndpoint::new(client, command);
        if self.registry.is_registered(&endpoint) {
            return Err(NamingError::AlreadyRegistered(endpoint));
        }

        let _root = self.coordinator.lock_root_exclusive().await?;
        let node = Arc::new(StorageNode::new(endpoint, self.connector.command(&endpoint)));
        self.registry.register(node.clone())?;
        if files.is_empty() {
            info!(%endpoint, "Registered idle storage node");
            return Ok(Vec::new());
        }

        let reported: BTreeSet<FsPath> = files.into_iter().filter(|f| !f.is_root()).collect();
        let mut duplicates = Vec::new();
        for file in reported {
            let host = node.clone();
            let registry = &self.registry;
            match self
                .tree
                .graft_file_with(&file, endpoint, || registry.add_host(&file, host))?
            {
                Graft::Created { directories } => {
                    debug!(path = %file, created_dirs = directories.len(), "Adopted reported file");
                }
                Graft::Conflict => duplicates.push(file),
            }
        }
        info!(
            %endpoint,
            duplicates = duplicates.len(),
            "Registered storage node"
        );
        Ok(duplicates)
    }
}
