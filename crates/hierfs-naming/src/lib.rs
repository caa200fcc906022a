#![warn(missing_docs)]

//! HierFS naming node: directory tree, hierarchical locking, replica
//! placement and the storage node join protocol.

pub mod config;
pub mod coordinator;
pub mod lock;
pub mod path;
pub mod registration;
pub mod registry;
pub mod remote;
pub mod rpc;
pub mod server;
pub mod service;
pub mod storage;
pub mod tree;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::NamingConfig;
pub use coordinator::LockCoordinator;
pub use lock::{LockError, LockMode, NodeLock};
pub use path::{FsPath, PathError};
pub use registration::RegistrationHandler;
pub use registry::{ReplicaRegistry, StorageNode};
pub use remote::{RemoteClient, RemoteCommand, TcpConnector};
pub use rpc::{NamingClient, RegistrationClient};
pub use server::NamingServer;
pub use service::NamingService;
pub use storage::{StorageClient, StorageCommand, StorageConnector, StorageError};
pub use tree::DirectoryTree;
pub use types::{NamingError, NodeKind, StorageEndpoint};
