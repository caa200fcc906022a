//! Registered storage nodes and the file-to-host map.
//!
//! Each file maps to the list of storage nodes holding a copy. A node's
//! hosted-file count decides whether it is idle; idle nodes are preferred
//! as replication targets. Directories never appear here.

use std::fmt;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use rand::seq::SliceRandom;

use crate::path::FsPath;
use crate::storage::StorageCommand;
use crate::types::{NamingError, Result, StorageEndpoint};

/// A registered storage node and its Command stub.
pub struct StorageNode {
    endpoint: StorageEndpoint,
    command: Arc<dyn StorageCommand>,
}

impl StorageNode {
    /// Binds an endpoint to its Command stub.
    pub fn new(endpoint: StorageEndpoint, command: Arc<dyn StorageCommand>) -> Self {
        Self { endpoint, command }
    }

    /// Addresses of the node.
    pub fn endpoint(&self) -> StorageEndpoint {
        self.endpoint
    }

    /// Command interface stub.
    pub fn command(&self) -> &dyn StorageCommand {
        self.command.as_ref()
    }
}

impl fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageNode")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Storage node membership and replica placement.
#[derive(Default)]
pub struct ReplicaRegistry {
    nodes: DashMap<StorageEndpoint, Arc<StorageNode>>,
    hosts: DashMap<FsPath, Vec<Arc<StorageNode>>>,
    load: DashMap<StorageEndpoint, usize>,
    idle: DashSet<StorageEndpoint>,
}

impl ReplicaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. It starts idle.
    pub fn register(&self, node: Arc<StorageNode>) -> Result<()> {
        let endpoint = node.endpoint();
        match self.nodes.entry(endpoint) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NamingError::AlreadyRegistered(endpoint)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(node);
                self.load.insert(endpoint, 0);
                self.idle.insert(endpoint);
                Ok(())
            }
        }
    }

    /// True if a node with this endpoint is registered.
    pub fn is_registered(&self, endpoint: &StorageEndpoint) -> bool {
        self.nodes.contains_key(endpoint)
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// True if the node hosts no file.
    pub fn is_idle(&self, endpoint: &StorageEndpoint) -> bool {
        self.idle.contains(endpoint)
    }

    /// Nodes currently hosting no file.
    pub fn idle_nodes(&self) -> Vec<StorageEndpoint> {
        self.idle.iter().map(|e| *e).collect()
    }

    fn adjust_load(&self, endpoint: StorageEndpoint, hosted: bool) {
        let mut load = self.load.entry(endpoint).or_insert(0);
        if hosted {
            *load += 1;
        } else {
            *load = load.saturating_sub(1);
        }
        if *load == 0 {
            self.idle.insert(endpoint);
        } else {
            self.idle.remove(&endpoint);
        }
    }

    /// Records `node` as a host of `path`, creating the entry if needed.
    pub fn add_host(&self, path: &FsPath, node: Arc<StorageNode>) {
        let mut hosts = self.hosts.entry(path.clone()).or_default();
        if !hosts.iter().any(|h| h.endpoint() == node.endpoint()) {
            self.adjust_load(node.endpoint(), true);
            hosts.push(node);
        }
    }

    /// Adds a host to a file that is still present. Returns false if the
    /// file was removed meanwhile or the node already hosts it.
    pub fn add_replica(&self, path: &FsPath, node: Arc<StorageNode>) -> bool {
        match self.hosts.get_mut(path) {
            Some(mut hosts) if !hosts.iter().any(|h| h.endpoint() == node.endpoint()) => {
                self.adjust_load(node.endpoint(), true);
                hosts.push(node);
                true
            }
            _ => false,
        }
    }

    /// Shrinks the hosting list to its first host. Returns the dropped hosts.
    pub fn retain_one(&self, path: &FsPath) -> Vec<Arc<StorageNode>> {
        let Some(mut hosts) = self.hosts.get_mut(path) else {
            return Vec::new();
        };
        if hosts.len() <= 1 {
            return Vec::new();
        }
        let dropped: Vec<_> = hosts.drain(1..).collect();
        for node in &dropped {
            self.adjust_load(node.endpoint(), false);
        }
        dropped
    }

    /// Forgets a file. Returns the nodes that hosted it.
    pub fn remove_file(&self, path: &FsPath) -> Vec<Arc<StorageNode>> {
        match self.hosts.remove(path) {
            Some((_, hosts)) => {
                for node in &hosts {
                    self.adjust_load(node.endpoint(), false);
                }
                hosts
            }
            None => Vec::new(),
        }
    }

    /// Current hosts of a file.
    pub fn hosts(&self, path: &FsPath) -> Vec<Arc<StorageNode>> {
        self.hosts
            .get(path)
            .map(|hosts| hosts.clone())
            .unwrap_or_default()
    }

    /// A registered node chosen uniformly at random.
    pub fn random_node(&self) -> Option<Arc<StorageNode>> {
        let nodes: Vec<_> = self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.choose(&mut rand::thread_rng()).cloned()
    }

    /// A host of `path` chosen uniformly at random.
    pub fn random_host(&self, path: &FsPath) -> Option<Arc<StorageNode>> {
        let hosts = self.hosts.get(path)?;
        hosts.choose(&mut rand::thread_rng()).cloned()
    }

    /// Registered nodes not hosting `path`, idle nodes first.
    pub fn replication_targets(&self, path: &FsPath) -> Vec<Arc<StorageNode>> {
        let hosting: Vec<StorageEndpoint> = self.hosts(path).iter().map(|h| h.endpoint()).collect();
        let mut targets: Vec<Arc<StorageNode>> = self
            .nodes
            .iter()
            .filter(|n| !hosting.contains(n.key()))
            .map(|n| n.value().clone())
            .collect();
        targets.sort_by_key(|n| !self.is_idle(&n.endpoint()));
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{endpoint, MockStorage};

    fn node(port: u16) -> Arc<StorageNode> {
        Arc::new(StorageNode::new(endpoint(port), MockStorage::new()))
    }

    fn p(s: &str) -> FsPath {
        s.parse().unwrap()
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = ReplicaRegistry::new();
        let a = node(7000);
        registry.register(a.clone()).unwrap();
        match registry.register(a.clone()) {
            Err(NamingError::AlreadyRegistered(endpoint)) => assert_eq!(endpoint, a.endpoint()),
            other => panic!("expected AlreadyRegistered, got {:?}", other),
        }
        assert!(registry.is_idle(&a.endpoint()));
        assert_eq!(registry.node_count(), 1);
    }

    #[test]
    fn test_hosting_updates_idle_set() {
        let registry = ReplicaRegistry::new();
        let a = node(7000);
        registry.register(a.clone()).unwrap();

        registry.add_host(&p("/f"), a.clone());
        registry.add_host(&p("/g"), a.clone());
        assert!(!registry.is_idle(&a.endpoint()));

        registry.remove_file(&p("/f"));
        assert!(!registry.is_idle(&a.endpoint()));
        registry.remove_file(&p("/g"));
        assert!(registry.is_idle(&a.endpoint()));
    }

    #[test]
    fn test_add_replica_requires_existing_entry() {
        let registry = ReplicaRegistry::new();
        let a = node(7000);
        let b = node(7002);
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        assert!(!registry.add_replica(&p("/f"), b.clone()));
        registry.add_host(&p("/f"), a.clone());
        assert!(registry.add_replica(&p("/f"), b.clone()));
        assert!(!registry.add_replica(&p("/f"), b.clone()));
        assert_eq!(registry.hosts(&p("/f")).len(), 2);
    }

    #[test]
    fn test_retain_one_drops_the_rest() {
        let registry = ReplicaRegistry::new();
        let nodes: Vec<_> = (0..3).map(|i| node(7000 + i * 2)).collect();
        for n in &nodes {
            registry.register(n.clone()).unwrap();
            registry.add_host(&p("/f"), n.clone());
        }

        let dropped = registry.retain_one(&p("/f"));
        assert_eq!(dropped.len(), 2);
        let kept = registry.hosts(&p("/f"));
        assert_eq!(kept.len(), 1);
        assert!(dropped.iter().all(|d| d.endpoint() != kept[0].endpoint()));
        assert!(dropped.iter().all(|d| registry.is_idle(&d.endpoint())));
        assert!(registry.retain_one(&p("/f")).is_empty());
    }

    #[test]
    fn test_replication_targets_prefer_idle() {
        let registry = ReplicaRegistry::new();
        let source = node(7000);
        let busy = node(7002);
        let idle = node(7004);
        for n in [&source, &busy, &idle] {
            registry.register((*n).clone()).unwrap();
        }
        registry.add_host(&p("/f"), source.clone());
        registry.add_host(&p("/other"), busy.clone());

        let targets = registry.replication_targets(&p("/f"));
        let endpoints: Vec<_> = targets.iter().map(|t| t.endpoint()).collect();
        assert_eq!(endpoints, vec![idle.endpoint(), busy.endpoint()]);
    }

    #[test]
    fn test_random_selection() {
        let registry = ReplicaRegistry::new();
        assert!(registry.random_node().is_none());
        assert!(registry.random_host(&p("/f")).is_none());

        let a = node(7000);
        registry.register(a.clone()).unwrap();
        registry.add_host(&p("/f"), a.clone());
        assert_eq!(registry.random_node().unwrap().endpoint(), a.endpoint());
        assert_eq!(registry.random_host(&p("/f")).unwrap().endpoint(), a.endpoint());
    }
}
