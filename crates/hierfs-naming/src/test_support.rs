//! In-memory storage node doubles for unit tests.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hierfs_transport::{CallError, TransportError};

use crate::path::FsPath;
use crate::storage::{CommandRequest, StorageCommand, StorageConnector, StorageResult};
use crate::types::StorageEndpoint;

/// Records every command and keeps the set of files it holds.
#[derive(Default)]
pub struct MockStorage {
    files: Mutex<BTreeSet<FsPath>>,
    calls: Mutex<Vec<CommandRequest>>,
    unreachable: AtomicBool,
}

impl MockStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_files(files: &[&str]) -> Arc<Self> {
        let mock = Self::new();
        for file in files {
            mock.files.lock().unwrap().insert(file.parse().unwrap());
        }
        mock
    }

    /// Makes every later command fail as a network error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn has(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains(&path.parse::<FsPath>().unwrap())
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<FsPath> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                CommandRequest::Delete(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn copies(&self) -> Vec<(FsPath, SocketAddr)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                CommandRequest::Copy { path, source } => Some((path, source)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, request: CommandRequest) -> StorageResult<()> {
        self.calls.lock().unwrap().push(request);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CallError::Transport(TransportError::ConnectionReset));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageCommand for MockStorage {
    async fn create(&self, path: &FsPath) -> StorageResult<bool> {
        self.record(CommandRequest::Create(path.clone()))?;
        Ok(self.files.lock().unwrap().insert(path.clone()))
    }

    async fn delete(&self, path: &FsPath) -> StorageResult<bool> {
        self.record(CommandRequest::Delete(path.clone()))?;
        let mut files = self.files.lock().unwrap();
        let before = files.len();
        files.retain(|f| !f.is_subpath(path));
        Ok(files.len() != before)
    }

    async fn copy(&self, path: &FsPath, source: SocketAddr) -> StorageResult<bool> {
        self.record(CommandRequest::Copy {
            path: path.clone(),
            source,
        })?;
        self.files.lock().unwrap().insert(path.clone());
        Ok(true)
    }
}

/// Hands out one [`MockStorage`] per endpoint.
#[derive(Default)]
pub struct MockConnector {
    nodes: Mutex<HashMap<StorageEndpoint, Arc<MockStorage>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-seeds the double used for `endpoint`.
    pub fn insert(&self, endpoint: StorageEndpoint, storage: Arc<MockStorage>) {
        self.nodes.lock().unwrap().insert(endpoint, storage);
    }

    pub fn storage(&self, endpoint: &StorageEndpoint) -> Arc<MockStorage> {
        self.nodes
            .lock()
            .unwrap()
            .entry(*endpoint)
            .or_insert_with(MockStorage::new)
            .clone()
    }
}

impl StorageConnector for MockConnector {
    fn command(&self, endpoint: &StorageEndpoint) -> Arc<dyn StorageCommand> {
        self.storage(endpoint)
    }
}

/// Endpoint with client port `port` and command port `port + 1`.
pub fn endpoint(port: u16) -> StorageEndpoint {
    StorageEndpoint::new(
        SocketAddr::from(([127, 0, 0, 1], port)),
        SocketAddr::from(([127, 0, 0, 1], port + 1)),
    )
}
