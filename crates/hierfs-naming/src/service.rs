//! The naming node's operations, independent of the wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::coordinator::LockCoordinator;
use crate::lock::LockMode;
use crate::path::FsPath;
use crate::registration::RegistrationHandler;
use crate::registry::ReplicaRegistry;
use crate::storage::StorageConnector;
use crate::tree::DirectoryTree;
use crate::types::{NamingError, NodeKind, Result};

/// Everything the Service and Registration interfaces expose.
pub struct NamingService {
    tree: Arc<DirectoryTree>,
    registry: Arc<ReplicaRegistry>,
    coordinator: Arc<LockCoordinator>,
    registration: RegistrationHandler,
}

impl NamingService {
    /// Creates an empty naming node state. `connector` turns registering
    /// storage nodes into Command stubs.
    pub fn new(replication_threshold: u32, connector: Arc<dyn StorageConnector>) -> Self {
        let tree = Arc::new(DirectoryTree::new(replication_threshold));
        let registry = Arc::new(ReplicaRegistry::new());
        let coordinator = Arc::new(LockCoordinator::new(tree.clone(), registry.clone()));
        let registration =
            RegistrationHandler::new(tree.clone(), registry.clone(), coordinator.clone(), connector);
        Self {
            tree,
            registry,
            coordinator,
            registration,
        }
    }

    /// Metadata tree.
    pub fn tree(&self) -> &DirectoryTree {
        &self.tree
    }

    /// Replica registry.
    pub fn registry(&self) -> &ReplicaRegistry {
        &self.registry
    }

    /// Locks `path` for shared or exclusive access.
    pub async fn lock(&self, path: &FsPath, exclusive: bool) -> Result<()> {
        self.coordinator.lock(path, LockMode::from_exclusive(exclusive)).await
    }

    /// Releases a lock taken with the same `exclusive` flag.
    pub async fn unlock(&self, path: &FsPath, exclusive: bool) -> Result<()> {
        self.coordinator.unlock(path, LockMode::from_exclusive(exclusive)).await
    }

    /// True for directories, false for files.
    pub fn is_directory(&self, path: &FsPath) -> Result<bool> {
        self.tree.is_directory(path)
    }

    /// Entry names of a directory, in no particular order.
    pub fn list(&self, path: &FsPath) -> Result<Vec<String>> {
        self.tree.list(path)
    }

    fn check_parent(&self, path: &FsPath) -> Result<()> {
        let parent = path.parent()?;
        match self.tree.lookup(&parent)? {
            Some(node) if node.is_directory() => Ok(()),
            _ => Err(NamingError::NotFound(parent)),
        }
    }

    /// Creates an empty file on a randomly chosen storage node. Returns
    /// false if the path already exists.
    pub async fn create_file(&self, path: &FsPath) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        self.check_parent(path)?;
        if self.tree.contains(path)? {
            return Ok(false);
        }
        let node = self
            .registry
            .random_node()
            .ok_or_else(|| NamingError::InvalidState("no storage node registered".to_string()))?;
        let endpoint = node.endpoint();

        match node.command().create(path).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%path, host = %endpoint, "Storage node already holds the file");
                return Ok(false);
            }
            Err(e) => {
                return Err(NamingError::StorageFailure {
                    endpoint: endpoint.command,
                    reason: e.to_string(),
                })
            }
        }

        let host = node.clone();
        let registry = &self.registry;
        match self
            .tree
            .create_with(path, NodeKind::File, None, || registry.add_host(path, host))
        {
            Ok(true) => {
                info!(%path, host = %endpoint, "Created file");
                Ok(true)
            }
            outcome => {
                // Lost a race with another create or a delete; drop the orphan.
                if let Err(e) = node.command().delete(path).await {
                    warn!(%path, host = %endpoint, error = %e, "Failed to remove orphaned file");
                }
                outcome
            }
        }
    }

    /// Creates a directory. Metadata only.
    pub fn create_directory(&self, path: &FsPath) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        self.check_parent(path)?;
        let created = self.tree.create(path, NodeKind::Directory, None)?;
        if created {
            debug!(%path, "Created directory");
        }
        Ok(created)
    }

    /// Deletes a file or a directory tree. Returns false for root.
    ///
    /// Every storage node that hosted a removed file is told to delete
    /// `path`; failures are logged.
    pub async fn delete(&self, path: &FsPath) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        let removed = self.tree.remove(path)?;
        let mut hosts = HashMap::new();
        for file in &removed {
            for node in self.registry.remove_file(file) {
                hosts.entry(node.endpoint()).or_insert(node);
            }
        }
        for (endpoint, node) in hosts {
            match node.command().delete(path).await {
                Ok(_) => debug!(%path, host = %endpoint, "Deleted on storage node"),
                Err(e) => warn!(%path, host = %endpoint, error = %e, "Storage delete failed"),
            }
        }
        info!(%path, files = removed.len(), "Deleted");
        Ok(true)
    }

    /// Client address of a random storage node hosting `path`.
    pub fn get_storage(&self, path: &FsPath) -> Result<SocketAddr> {
        let node = self.tree.node(path)?;
        if node.is_directory() {
            return Err(NamingError::NotFound(path.clone()));
        }
        self.registry
            .random_host(path)
            .map(|host| host.endpoint().client)
            .ok_or_else(|| NamingError::InvalidState(format!("file {} has no host", path)))
    }

    /// Registers a storage node; see [`RegistrationHandler::register`].
    pub async fn register(
        &self,
        client: Option<SocketAddr>,
        command: Option<SocketAddr>,
        files: Option<Vec<FsPath>>,
    ) -> Result<Vec<FsPath>> {
        self.registration.register(client, command, files).await
    }

    /// Fails every pending and future lock request.
    pub fn shutdown(&self) -> Result<()> {
        self.tree.close_all_locks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{endpoint, MockConnector};

    fn p(s: &str) -> FsPath {
        s.parse().unwrap()
    }

    fn service() -> (NamingService, Arc<MockConnector>) {
        let connector = MockConnector::new();
        (NamingService::new(20, connector.clone()), connector)
    }

    async fn register(service: &NamingService, port: u16, files: &[&str]) -> Vec<FsPath> {
        let e = endpoint(port);
        service
            .register(Some(e.client), Some(e.command), Some(files.iter().map(|f| p(f)).collect()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_file_needs_storage() {
        let (service, _) = service();
        assert!(matches!(
            service.create_file(&p("/f")).await,
            Err(NamingError::InvalidState(_))
        ));
        assert!(service.create_directory(&p("/d")).unwrap());
    }

    #[tokio::test]
    async fn test_create_file_places_on_storage() {
        let (service, connector) = service();
        register(&service, 7000, &[]).await;

        assert!(service.create_file(&p("/f")).await.unwrap());
        assert!(connector.storage(&endpoint(7000)).has("/f"));
        assert_eq!(service.get_storage(&p("/f")).unwrap(), endpoint(7000).client);
        assert!(!service.registry().is_idle(&endpoint(7000)));

        assert!(!service.create_file(&p("/f")).await.unwrap());
        assert!(!service.create_file(&FsPath::root()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_requires_directory_parent() {
        let (service, _) = service();
        register(&service, 7000, &[]).await;
        assert!(matches!(
            service.create_file(&p("/missing/f")).await,
            Err(NamingError::NotFound(_))
        ));
        service.create_file(&p("/f")).await.unwrap();
        assert!(matches!(
            service.create_directory(&p("/f/d")),
            Err(NamingError::NotFound(_))
        ));
        assert!(!service.create_directory(&FsPath::root()).unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_storage_leaves_metadata_untouched() {
        let (service, connector) = service();
        connector.storage(&endpoint(7000)).set_unreachable(true);
        register(&service, 7000, &[]).await;

        match service.create_file(&p("/f")).await {
            Err(NamingError::StorageFailure { endpoint: addr, .. }) => {
                assert_eq!(addr, endpoint(7000).command)
            }
            other => panic!("expected StorageFailure, got {:?}", other),
        }
        assert!(!service.tree().contains(&p("/f")).unwrap());
    }

    #[tokio::test]
    async fn test_delete_directory_reaches_every_host() {
        let (service, connector) = service();
        register(&service, 7000, &["/d/x"]).await;
        register(&service, 7002, &["/d/y", "/other"]).await;

        assert!(service.delete(&p("/d")).await.unwrap());
        assert_eq!(connector.storage(&endpoint(7000)).deletes(), vec![p("/d")]);
        assert_eq!(connector.storage(&endpoint(7002)).deletes(), vec![p("/d")]);
        assert!(service.registry().hosts(&p("/d/x")).is_empty());
        assert!(service.registry().is_idle(&endpoint(7000)));
        assert!(!service.registry().is_idle(&endpoint(7002)));
        assert!(matches!(
            service.is_directory(&p("/d")),
            Err(NamingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_edge_cases() {
        let (service, _) = service();
        assert!(!service.delete(&FsPath::root()).await.unwrap());
        assert!(matches!(
            service.delete(&p("/nope")).await,
            Err(NamingError::NotFound(_))
        ));
        service.create_directory(&p("/empty")).unwrap();
        assert!(service.delete(&p("/empty")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_survives_unreachable_host() {
        let (service, connector) = service();
        register(&service, 7000, &["/f"]).await;
        connector.storage(&endpoint(7000)).set_unreachable(true);
        assert!(service.delete(&p("/f")).await.unwrap());
        assert!(!service.tree().contains(&p("/f")).unwrap());
    }

    #[tokio::test]
    async fn test_get_storage_rejects_directories() {
        let (service, _) = service();
        register(&service, 7000, &["/d/f"]).await;
        assert!(matches!(
            service.get_storage(&p("/d")),
            Err(NamingError::NotFound(_))
        ));
        assert!(matches!(
            service.get_storage(&p("/nope")),
            Err(NamingError::NotFound(_))
        ));
        assert_eq!(service.get_storage(&p("/d/f")).unwrap(), endpoint(7000).client);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_created_file_always_has_a_host() {
        let (service, _) = service();
        let service = Arc::new(service);
        register(&service, 7000, &[]).await;
        let paths: Vec<FsPath> = (0..200).map(|i| p(&format!("/f{}", i))).collect();

        let creator_service = service.clone();
        let creator_paths = paths.clone();
        let creator = tokio::spawn(async move {
            for path in &creator_paths {
                assert!(creator_service.create_file(path).await.unwrap());
            }
        });

        while !creator.is_finished() {
            for path in &paths {
                match service.get_storage(path) {
                    Ok(addr) => assert_eq!(addr, endpoint(7000).client),
                    Err(NamingError::NotFound(_)) => {}
                    Err(other) => panic!("file visible without a host: {:?}", other),
                }
            }
            tokio::task::yield_now().await;
        }
        creator.await.unwrap();
        for path in &paths {
            assert_eq!(service.get_storage(path).unwrap(), endpoint(7000).client);
        }
    }

    #[tokio::test]
    async fn test_shutdown_fails_lockers() {
        let (service, _) = service();
        service.lock(&FsPath::root(), true).await.unwrap();
        service.shutdown().unwrap();
        assert!(matches!(
            service.lock(&FsPath::root(), false).await,
            Err(NamingError::InvalidState(_))
        ));
    }
}
