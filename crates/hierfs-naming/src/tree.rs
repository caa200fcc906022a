//! Directory tree metadata store.
//!
//! Nodes live in an arena keyed by path; each directory slot indexes its
//! children by name. The structural `RwLock` guards insertion, lookup and
//! removal only and is never held across an await. Access to a node's
//! content is governed by its [`NodeLock`], which callers hold for as long
//! as they like.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::lock::NodeLock;
use crate::path::FsPath;
use crate::types::{AccessKind, NamingError, NodeKind, Result, StorageEndpoint};

/// Access counter that wraps to zero at the replication threshold.
#[derive(Debug, Default)]
pub struct AccessCounter {
    count: AtomicU32,
}

impl AccessCounter {
    /// Counts one access. Returns true when this access reached the
    /// threshold; the counter is then back at zero.
    pub fn record(&self, threshold: u32) -> bool {
        let threshold = threshold.max(1);
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                let next = n + 1;
                Some(if next >= threshold { 0 } else { next })
            })
            .unwrap_or_else(|n| n);
        previous + 1 >= threshold
    }

    /// Current value.
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

/// A file or directory.
#[derive(Debug)]
pub struct TreeNode {
    name: String,
    kind: NodeKind,
    origin: Option<StorageEndpoint>,
    lock: NodeLock,
    reads: AccessCounter,
    writes: AccessCounter,
}

impl TreeNode {
    fn new(name: String, kind: NodeKind, origin: Option<StorageEndpoint>) -> Self {
        Self {
            name,
            kind,
            origin,
            lock: NodeLock::new(),
            reads: AccessCounter::default(),
            writes: AccessCounter::default(),
        }
    }

    /// Final path component; empty for root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File or directory.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// True for directories.
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Storage node whose registration created this node, if any.
    pub fn origin(&self) -> Option<StorageEndpoint> {
        self.origin
    }

    /// Content lock.
    pub fn lock(&self) -> &NodeLock {
        &self.lock
    }

    /// Counts an access of `kind`; true if the file should be replicated now.
    pub fn record_access(&self, kind: AccessKind, threshold: u32) -> bool {
        match kind {
            AccessKind::Read => self.reads.record(threshold),
            AccessKind::Write => self.writes.record(threshold),
        }
    }

    /// Read accesses since the last wrap.
    pub fn reads(&self) -> u32 {
        self.reads.get()
    }

    /// Write accesses since the last wrap.
    pub fn writes(&self) -> u32 {
        self.writes.get()
    }
}

struct Slot {
    node: Arc<TreeNode>,
    children: BTreeSet<String>,
}

impl Slot {
    fn new(node: TreeNode) -> Self {
        Self {
            node: Arc::new(node),
            children: BTreeSet::new(),
        }
    }
}

/// Outcome of grafting a reported file into the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Graft {
    /// The file was created, along with these missing directories.
    Created {
        /// Directories created on the way, ascending.
        directories: Vec<FsPath>,
    },
    /// The path exists, or a file stands where a directory is needed.
    Conflict,
}

/// The naming node's metadata tree. Root always exists.
pub struct DirectoryTree {
    slots: RwLock<HashMap<FsPath, Slot>>,
    threshold: u32,
}

impl DirectoryTree {
    /// Creates a tree holding only root.
    pub fn new(threshold: u32) -> Self {
        let mut slots = HashMap::new();
        slots.insert(
            FsPath::root(),
            Slot::new(TreeNode::new(String::new(), NodeKind::Directory, None)),
        );
        Self {
            slots: RwLock::new(slots),
            threshold,
        }
    }

    /// Accesses between replications.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn read_slots(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<FsPath, Slot>>> {
        self.slots
            .read()
            .map_err(|e| NamingError::Internal(e.to_string()))
    }

    fn write_slots(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<FsPath, Slot>>> {
        self.slots
            .write()
            .map_err(|e| NamingError::Internal(e.to_string()))
    }

    /// The node at `path`, if present.
    pub fn lookup(&self, path: &FsPath) -> Result<Option<Arc<TreeNode>>> {
        Ok(self.read_slots()?.get(path).map(|slot| slot.node.clone()))
    }

    /// The node at `path`, or NotFound.
    pub fn node(&self, path: &FsPath) -> Result<Arc<TreeNode>> {
        self.lookup(path)?
            .ok_or_else(|| NamingError::NotFound(path.clone()))
    }

    /// True if `path` exists.
    pub fn contains(&self, path: &FsPath) -> Result<bool> {
        Ok(self.read_slots()?.contains_key(path))
    }

    /// True for directories, false for files, NotFound otherwise.
    pub fn is_directory(&self, path: &FsPath) -> Result<bool> {
        Ok(self.node(path)?.is_directory())
    }

    /// Names of the entries of a directory.
    pub fn list(&self, path: &FsPath) -> Result<Vec<String>> {
        let slots = self.read_slots()?;
        match slots.get(path) {
            Some(slot) if slot.node.is_directory() => Ok(slot.children.iter().cloned().collect()),
            _ => Err(NamingError::NotFound(path.clone())),
        }
    }

    /// Creates a file or directory under an existing directory. Returns
    /// false if something already exists at `path`, root included.
    pub fn create(&self, path: &FsPath, kind: NodeKind, origin: Option<StorageEndpoint>) -> Result<bool> {
        self.create_with(path, kind, origin, || {})
    }

    /// Like [`create`](Self::create), running `on_insert` under the
    /// structural lock just before the node becomes visible. Lookups
    /// therefore never see the node without its effects.
    pub fn create_with(
        &self,
        path: &FsPath,
        kind: NodeKind,
        origin: Option<StorageEndpoint>,
        on_insert: impl FnOnce(),
    ) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        let parent = path.parent()?;
        let name = path.last()?.to_string();
        let mut slots = self.write_slots()?;
        match slots.get(&parent) {
            Some(slot) if slot.node.is_directory() => {}
            _ => return Err(NamingError::NotFound(parent)),
        }
        if slots.contains_key(path) {
            return Ok(false);
        }
        on_insert();
        insert_child(&mut slots, &parent, path.clone(), TreeNode::new(name, kind, origin));
        debug!(%path, ?kind, "Created tree node");
        Ok(true)
    }

    /// Creates the file at `path` with every missing ancestor directory,
    /// recording `origin` on each node created. Nothing changes on conflict.
    pub fn graft_file(&self, path: &FsPath, origin: StorageEndpoint) -> Result<Graft> {
        self.graft_file_with(path, origin, || {})
    }

    /// Like [`graft_file`](Self::graft_file), running `on_insert` under the
    /// structural lock before the file becomes visible. Not run on conflict.
    pub fn graft_file_with(
        &self,
        path: &FsPath,
        origin: StorageEndpoint,
        on_insert: impl FnOnce(),
    ) -> Result<Graft> {
        if path.is_root() {
            return Ok(Graft::Conflict);
        }
        let ancestors = path.parent()?.prefixes();
        let mut slots = self.write_slots()?;
        if slots.contains_key(path) {
            return Ok(Graft::Conflict);
        }
        if ancestors
            .iter()
            .any(|dir| slots.get(dir).is_some_and(|slot| !slot.node.is_directory()))
        {
            return Ok(Graft::Conflict);
        }

        let mut directories = Vec::new();
        let mut parent = FsPath::root();
        for dir in ancestors {
            if !slots.contains_key(&dir) {
                let name = dir.last()?.to_string();
                insert_child(
                    &mut slots,
                    &parent,
                    dir.clone(),
                    TreeNode::new(name, NodeKind::Directory, Some(origin)),
                );
                directories.push(dir.clone());
            }
            parent = dir;
        }
        let name = path.last()?.to_string();
        on_insert();
        insert_child(
            &mut slots,
            &parent,
            path.clone(),
            TreeNode::new(name, NodeKind::File, Some(origin)),
        );
        Ok(Graft::Created { directories })
    }

    /// Removes `path` and everything below it. Returns the removed files.
    /// Locks of removed nodes are closed so that waiters fail.
    pub fn remove(&self, path: &FsPath) -> Result<Vec<FsPath>> {
        if path.is_root() {
            return Err(NamingError::InvalidOperation("cannot remove root".to_string()));
        }
        let parent = path.parent()?;
        let name = path.last()?;
        let mut slots = self.write_slots()?;
        if !slots.contains_key(path) {
            return Err(NamingError::NotFound(path.clone()));
        }
        if let Some(parent_slot) = slots.get_mut(&parent) {
            parent_slot.children.remove(name);
        }

        let mut files = Vec::new();
        let mut pending = vec![path.clone()];
        while let Some(current) = pending.pop() {
            if let Some(slot) = slots.remove(&current) {
                slot.node.lock().close();
                if slot.node.is_directory() {
                    for child in &slot.children {
                        pending.push(current.join(child)?);
                    }
                } else {
                    files.push(current);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every file at or below `path`, ascending.
    pub fn files_under(&self, path: &FsPath) -> Result<Vec<FsPath>> {
        let slots = self.read_slots()?;
        if !slots.contains_key(path) {
            return Err(NamingError::NotFound(path.clone()));
        }
        let mut files = Vec::new();
        let mut pending = vec![path.clone()];
        while let Some(current) = pending.pop() {
            if let Some(slot) = slots.get(&current) {
                if slot.node.is_directory() {
                    for child in &slot.children {
                        pending.push(current.join(child)?);
                    }
                } else {
                    files.push(current);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Number of nodes, root included.
    pub fn node_count(&self) -> Result<usize> {
        Ok(self.read_slots()?.len())
    }

    /// Closes every node lock, failing all current and future waiters.
    pub fn close_all_locks(&self) -> Result<()> {
        for slot in self.read_slots()?.values() {
            slot.node.lock().close();
        }
        Ok(())
    }
}

fn insert_child(slots: &mut HashMap<FsPath, Slot>, parent: &FsPath, path: FsPath, node: TreeNode) {
    if let Some(parent_slot) = slots.get_mut(parent) {
        parent_slot.children.insert(node.name.clone());
    }
    slots.insert(path, Slot::new(node));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockError, LockMode};

    fn p(s: &str) -> FsPath {
        s.parse().unwrap()
    }

    fn endpoint() -> StorageEndpoint {
        StorageEndpoint::new("127.0.0.1:7000".parse().unwrap(), "127.0.0.1:7001".parse().unwrap())
    }

    #[test]
    fn test_counter_wraps_at_threshold() {
        let counter = AccessCounter::default();
        for _ in 0..19 {
            assert!(!counter.record(20));
        }
        assert_eq!(counter.get(), 19);
        assert!(counter.record(20));
        assert_eq!(counter.get(), 0);
        assert!(!counter.record(20));
    }

    #[test]
    fn test_root_exists() {
        let tree = DirectoryTree::new(20);
        assert!(tree.is_directory(&FsPath::root()).unwrap());
        assert!(tree.list(&FsPath::root()).unwrap().is_empty());
        assert!(!tree.create(&FsPath::root(), NodeKind::Directory, None).unwrap());
    }

    #[test]
    fn test_create_requires_directory_parent() {
        let tree = DirectoryTree::new(20);
        match tree.create(&p("/a/b"), NodeKind::File, None) {
            Err(NamingError::NotFound(missing)) => assert_eq!(missing, p("/a")),
            other => panic!("expected NotFound, got {:?}", other),
        }
        assert!(tree.create(&p("/a"), NodeKind::File, None).unwrap());
        assert!(matches!(
            tree.create(&p("/a/b"), NodeKind::File, None),
            Err(NamingError::NotFound(_))
        ));
        assert!(!tree.create(&p("/a"), NodeKind::Directory, None).unwrap());
    }

    #[test]
    fn test_list_and_is_directory() {
        let tree = DirectoryTree::new(20);
        tree.create(&p("/d"), NodeKind::Directory, None).unwrap();
        tree.create(&p("/d/x"), NodeKind::File, None).unwrap();
        tree.create(&p("/d/y"), NodeKind::Directory, None).unwrap();

        let mut entries = tree.list(&p("/d")).unwrap();
        entries.sort();
        assert_eq!(entries, vec!["x".to_string(), "y".to_string()]);
        assert!(!tree.is_directory(&p("/d/x")).unwrap());
        assert!(matches!(tree.list(&p("/d/x")), Err(NamingError::NotFound(_))));
        assert!(matches!(tree.is_directory(&p("/nope")), Err(NamingError::NotFound(_))));
    }

    #[test]
    fn test_graft_creates_ancestors_with_origin() {
        let tree = DirectoryTree::new(20);
        tree.create(&p("/a"), NodeKind::Directory, None).unwrap();

        let graft = tree.graft_file(&p("/a/b/c/f.txt"), endpoint()).unwrap();
        assert_eq!(
            graft,
            Graft::Created {
                directories: vec![p("/a/b"), p("/a/b/c")]
            }
        );
        assert_eq!(tree.node(&p("/a/b")).unwrap().origin(), Some(endpoint()));
        assert_eq!(tree.node(&p("/a")).unwrap().origin(), None);
        assert!(!tree.is_directory(&p("/a/b/c/f.txt")).unwrap());
        assert_eq!(tree.list(&p("/a/b/c")).unwrap(), vec!["f.txt".to_string()]);
    }

    #[test]
    fn test_graft_conflicts_leave_tree_unchanged() {
        let tree = DirectoryTree::new(20);
        tree.create(&p("/f"), NodeKind::File, None).unwrap();
        let before = tree.node_count().unwrap();

        assert_eq!(tree.graft_file(&p("/f"), endpoint()).unwrap(), Graft::Conflict);
        assert_eq!(tree.graft_file(&p("/f/g/h"), endpoint()).unwrap(), Graft::Conflict);
        assert_eq!(tree.node_count().unwrap(), before);
    }

    #[test]
    fn test_insert_hooks_run_only_when_inserting() {
        let tree = DirectoryTree::new(20);
        let mut created = 0;
        assert!(tree
            .create_with(&p("/f"), NodeKind::File, None, || created += 1)
            .unwrap());
        assert!(!tree
            .create_with(&p("/f"), NodeKind::File, None, || created += 1)
            .unwrap());
        assert!(tree
            .create_with(&p("/missing/f"), NodeKind::File, None, || created += 1)
            .is_err());
        assert_eq!(created, 1);

        let mut grafted = 0;
        tree.graft_file_with(&p("/d/g"), endpoint(), || grafted += 1).unwrap();
        assert_eq!(
            tree.graft_file_with(&p("/d/g"), endpoint(), || grafted += 1).unwrap(),
            Graft::Conflict
        );
        assert_eq!(
            tree.graft_file_with(&p("/f/x"), endpoint(), || grafted += 1).unwrap(),
            Graft::Conflict
        );
        assert_eq!(grafted, 1);
    }

    #[test]
    fn test_remove_subtree_returns_files() {
        let tree = DirectoryTree::new(20);
        tree.graft_file(&p("/d/one"), endpoint()).unwrap();
        tree.graft_file(&p("/d/sub/two"), endpoint()).unwrap();
        tree.create(&p("/d/empty"), NodeKind::Directory, None).unwrap();

        assert_eq!(tree.files_under(&p("/d")).unwrap(), vec![p("/d/one"), p("/d/sub/two")]);
        let removed = tree.remove(&p("/d")).unwrap();
        assert_eq!(removed, vec![p("/d/one"), p("/d/sub/two")]);
        assert!(!tree.contains(&p("/d/sub")).unwrap());
        assert!(tree.list(&FsPath::root()).unwrap().is_empty());
        assert_eq!(tree.node_count().unwrap(), 1);
    }

    #[test]
    fn test_remove_rejects_root_and_missing() {
        let tree = DirectoryTree::new(20);
        assert!(matches!(
            tree.remove(&FsPath::root()),
            Err(NamingError::InvalidOperation(_))
        ));
        assert!(matches!(tree.remove(&p("/x")), Err(NamingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_closes_node_locks() {
        let tree = DirectoryTree::new(20);
        tree.create(&p("/f"), NodeKind::File, None).unwrap();
        let node = tree.node(&p("/f")).unwrap();
        tree.remove(&p("/f")).unwrap();
        assert_eq!(node.lock().acquire(LockMode::Shared).await, Err(LockError::Closed));
    }
}
