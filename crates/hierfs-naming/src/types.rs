//! Shared types and the naming node's error taxonomy.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::LockError;
use crate::path::{FsPath, PathError};

/// Default replication threshold: accesses between replications.
pub const DEFAULT_REPLICATION_THRESHOLD: u32 = 20;

/// Errors returned by the naming node. Sent to remote callers as part of
/// every Service and Registration response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NamingError {
    /// The path is absent where it must be present.
    #[error("path {0} not found")]
    NotFound(FsPath),

    /// The caller violated a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is undefined for its operand, e.g. the parent of root.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The server cannot perform the operation in its current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A required argument was missing.
    #[error("missing argument: {0}")]
    NullArgument(String),

    /// The storage node is already registered.
    #[error("storage node {0} is already registered")]
    AlreadyRegistered(StorageEndpoint),

    /// A storage node could not carry out a command the operation needs.
    #[error("storage node {endpoint} failed: {reason}")]
    StorageFailure {
        /// Command address of the failing node.
        endpoint: SocketAddr,
        /// What went wrong.
        reason: String,
    },

    /// Internal consistency failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PathError> for NamingError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::Root => NamingError::InvalidOperation(e.to_string()),
            other => NamingError::InvalidArgument(other.to_string()),
        }
    }
}

impl From<LockError> for NamingError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Closed => NamingError::InvalidState(e.to_string()),
            LockError::NotHeld(_) => NamingError::InvalidArgument(e.to_string()),
        }
    }
}

/// Result alias for naming node operations.
pub type Result<T> = std::result::Result<T, NamingError>;

/// Identity of a storage node: the address of its data plane (Client
/// interface) and of its control plane (Command interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageEndpoint {
    /// Client interface address.
    pub client: SocketAddr,
    /// Command interface address.
    pub command: SocketAddr,
}

impl StorageEndpoint {
    /// Creates an endpoint.
    pub fn new(client: SocketAddr, command: SocketAddr) -> Self {
        Self { client, command }
    }
}

impl fmt::Display for StorageEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client={} command={}", self.client, self.command)
    }
}

/// Whether a tree node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Carries bytes on storage nodes.
    File,
    /// Metadata only.
    Directory,
}

/// Which access counter a lock step increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Shared lock requests.
    Read,
    /// Ancestor steps of exclusive lock requests.
    Write,
}
