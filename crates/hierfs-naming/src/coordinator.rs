//! Hierarchical path locking with replication and invalidation.
//!
//! Locking a path shared-locks every ancestor from root down. All locks of
//! a request are taken in ascending [`FsPath`] order, which is the same
//! order every other request uses; that is what keeps concurrent requests
//! with overlapping paths from deadlocking.
//!
//! Side effects:
//! - a shared request counts a read on the file it reaches and, every
//!   `threshold` reads, copies the file to every storage node lacking it;
//! - an exclusive request, once granted, deletes all but one copy of the
//!   target file (or of every file below the target directory).

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::lock::{LockError, LockMode};
use crate::path::FsPath;
use crate::registry::ReplicaRegistry;
use crate::tree::{DirectoryTree, TreeNode};
use crate::types::{AccessKind, NamingError, Result};

/// Locks acquired by an in-flight request. Dropping the set releases them
/// in reverse order, so an error or a cancelled request leaves nothing held.
#[derive(Default)]
struct HeldLocks {
    held: Vec<(FsPath, Arc<TreeNode>, LockMode)>,
}

impl HeldLocks {
    fn push(&mut self, path: FsPath, node: Arc<TreeNode>, mode: LockMode) {
        self.held.push((path, node, mode));
    }

    /// Hands the locks over to the client; they are released by `unlock`.
    fn keep(mut self) {
        self.held.clear();
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        while let Some((path, node, mode)) = self.held.pop() {
            debug!(%path, ?mode, "Releasing lock of failed request");
            if let Err(e) = node.lock().release(mode) {
                warn!(%path, error = %e, "Rollback release failed");
            }
        }
    }
}

/// Root held exclusively for as long as the guard lives.
pub struct ExclusiveRoot {
    root: Arc<TreeNode>,
}

impl Drop for ExclusiveRoot {
    fn drop(&mut self) {
        if let Err(e) = self.root.lock().release(LockMode::Exclusive) {
            warn!(error = %e, "Releasing exclusive root failed");
        }
    }
}

/// Releases shared locks on `chain`, deepest first. Returns the first
/// failure; the remaining locks are still released.
fn release_ancestors(chain: Vec<(FsPath, Arc<TreeNode>)>) -> Option<LockError> {
    let mut first_error = None;
    for (step, node) in chain.into_iter().rev() {
        if let Err(e) = node.lock().release(LockMode::Shared) {
            warn!(path = %step, error = %e, "Ancestor was not shared-locked");
            first_error.get_or_insert(e);
        }
    }
    first_error
}

/// Implements `lock` and `unlock` over the tree and the replica registry.
pub struct LockCoordinator {
    tree: Arc<DirectoryTree>,
    registry: Arc<ReplicaRegistry>,
}

impl LockCoordinator {
    /// Creates a coordinator over shared state.
    pub fn new(tree: Arc<DirectoryTree>, registry: Arc<ReplicaRegistry>) -> Self {
        Self { tree, registry }
    }

    /// Locks `path` in `mode`, shared-locking its ancestors.
    pub async fn lock(&self, path: &FsPath, mode: LockMode) -> Result<()> {
        debug!(%path, ?mode, "Lock requested");
        if path.is_root() {
            let root = self.tree.node(path)?;
            self.acquire(path, &root, mode).await?;
            return Ok(());
        }

        let mut held = HeldLocks::default();
        match mode {
            LockMode::Shared => {
                for step in path.prefixes_with_root() {
                    let node = self.tree.node(&step)?;
                    self.count_access(&step, &node, AccessKind::Read).await;
                    self.acquire(&step, &node, LockMode::Shared).await?;
                    held.push(step, node, LockMode::Shared);
                }
            }
            LockMode::Exclusive => {
                self.tree.node(path)?;
                let mut chain = path.prefixes_with_root();
                chain.pop();
                for step in chain {
                    let node = self.tree.node(&step)?;
                    self.count_access(&step, &node, AccessKind::Write).await;
                    self.acquire(&step, &node, LockMode::Shared).await?;
                    held.push(step, node, LockMode::Shared);
                }
                let target = self.tree.node(path)?;
                self.acquire(path, &target, LockMode::Exclusive).await?;
                held.push(path.clone(), target.clone(), LockMode::Exclusive);
                self.invalidate(path, &target).await?;
            }
        }
        held.keep();
        debug!(%path, ?mode, "Lock granted");
        Ok(())
    }

    /// Releases a lock taken by [`lock`](Self::lock): the target first,
    /// then its ancestors from the deepest up.
    pub async fn unlock(&self, path: &FsPath, mode: LockMode) -> Result<()> {
        debug!(%path, ?mode, "Unlock requested");
        let mut chain = Vec::with_capacity(path.depth() + 1);
        for step in path.prefixes_with_root() {
            match self.tree.lookup(&step)? {
                Some(node) => chain.push((step, node)),
                None => {
                    // The prefixes that survive still carry this request's
                    // shared locks.
                    release_ancestors(chain);
                    return Err(NamingError::InvalidArgument(format!(
                        "cannot unlock {}: {} does not exist",
                        path, step
                    )));
                }
            }
        }

        let Some((_, target)) = chain.pop() else {
            return Err(NamingError::Internal("empty lock chain".to_string()));
        };
        target.lock().release(mode)?;
        match release_ancestors(chain) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Holds root exclusively until the guard is dropped.
    pub async fn lock_root_exclusive(&self) -> Result<ExclusiveRoot> {
        let root_path = FsPath::root();
        let root = self.tree.node(&root_path)?;
        self.acquire(&root_path, &root, LockMode::Exclusive).await?;
        Ok(ExclusiveRoot { root })
    }

    async fn acquire(&self, path: &FsPath, node: &TreeNode, mode: LockMode) -> Result<()> {
        match node.lock().acquire(mode).await {
            Ok(()) => {
                debug!(%path, ?mode, "Acquired");
                Ok(())
            }
            Err(LockError::Closed) if !self.tree.contains(path).unwrap_or(true) => {
                Err(NamingError::NotFound(path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs before the step's lock is requested, so a copy triggered here
    /// can overlap a writer holding the file exclusively.
    async fn count_access(&self, path: &FsPath, node: &TreeNode, kind: AccessKind) {
        if node.is_directory() {
            return;
        }
        if node.record_access(kind, self.tree.threshold()) {
            self.replicate(path).await;
        }
    }

    /// Copies `path` from one of its hosts to every node lacking it. Only
    /// confirmed copies become replicas; failures are logged.
    async fn replicate(&self, path: &FsPath) {
        let Some(source) = self.registry.hosts(path).into_iter().next() else {
            warn!(%path, "No host to replicate from");
            return;
        };
        let source_addr = source.endpoint().client;
        for target in self.registry.replication_targets(path) {
            let endpoint = target.endpoint();
            match target.command().copy(path, source_addr).await {
                Ok(true) => {
                    if self.registry.add_replica(path, target.clone()) {
                        info!(%path, target = %endpoint, "Replicated file");
                    }
                }
                Ok(false) => warn!(%path, target = %endpoint, "Storage node declined copy"),
                Err(e) => warn!(%path, target = %endpoint, error = %e, "Replication failed"),
            }
        }
    }

    /// Deletes every copy but one of the files at or below `path`.
    async fn invalidate(&self, path: &FsPath, node: &TreeNode) -> Result<()> {
        let files = if node.is_directory() {
            self.tree.files_under(path)?
        } else {
            vec![path.clone()]
        };
        for file in files {
            for stale in self.registry.retain_one(&file) {
                let endpoint = stale.endpoint();
                match stale.command().delete(&file).await {
                    Ok(_) => info!(path = %file, host = %endpoint, "Invalidated replica"),
                    Err(e) => warn!(path = %file, host = %endpoint, error = %e, "Invalidation delete failed"),
                }
            }
        }
        Ok(())
    }
}
