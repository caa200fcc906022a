//! Storage node interfaces as seen from the rest of the system.
//!
//! A storage node exposes two remote interfaces: Command, used by the
//! naming node to place and remove files, and Client, the data plane used
//! by clients and by peer storage nodes during replication. This module
//! holds their wire messages and the traits the naming node programs
//! against; [`crate::remote`] implements them over TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hierfs_transport::CallError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::FsPath;
use crate::types::StorageEndpoint;

/// Errors reported by a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StorageError {
    /// Absent, or a directory where a file is required.
    #[error("file {0} not found")]
    NotFound(FsPath),

    /// The byte range lies outside the file.
    #[error("range {offset}+{length} out of bounds for {path} ({size} bytes)")]
    OutOfBounds {
        /// File accessed.
        path: FsPath,
        /// Requested offset.
        offset: u64,
        /// Requested length.
        length: u64,
        /// Current file size.
        size: u64,
    },

    /// The request is not meaningful, such as deleting root.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Local file system failure.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Talking to a peer storage node failed during a copy.
    #[error("peer transfer failed: {0}")]
    Peer(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Requests on the Command interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandRequest {
    /// Create an empty file, with missing parent directories.
    Create(FsPath),
    /// Delete a file or a directory tree.
    Delete(FsPath),
    /// Pull a file from the peer whose Client interface is at `source`.
    Copy {
        /// File to copy.
        path: FsPath,
        /// Client address of a node hosting the file.
        source: SocketAddr,
    },
}

/// Responses on the Command interface.
pub type CommandResponse = Result<bool, StorageError>;

/// Requests on the Client interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Size of a file in bytes.
    Size(FsPath),
    /// Read `length` bytes at `offset`.
    Read {
        /// File to read.
        path: FsPath,
        /// Starting offset.
        offset: u64,
        /// Number of bytes.
        length: u64,
    },
    /// Write `data` at `offset`, extending the file as needed.
    Write {
        /// File to write.
        path: FsPath,
        /// Starting offset.
        offset: u64,
        /// Bytes to write.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

/// Successful replies on the Client interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientReply {
    /// Answer to [`ClientRequest::Size`].
    Size(u64),
    /// Answer to [`ClientRequest::Read`].
    Data(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Answer to [`ClientRequest::Write`].
    Written,
}

/// Responses on the Client interface.
pub type ClientResponse = Result<ClientReply, StorageError>;

/// Result of a call to a storage node.
pub type StorageResult<T> = Result<T, CallError<StorageError>>;

/// Control plane of a storage node.
#[async_trait]
pub trait StorageCommand: Send + Sync {
    /// Creates an empty file. `false` if it already exists.
    async fn create(&self, path: &FsPath) -> StorageResult<bool>;

    /// Deletes a file or directory. `false` if nothing was there.
    async fn delete(&self, path: &FsPath) -> StorageResult<bool>;

    /// Copies `path` from the node whose Client interface is at `source`.
    async fn copy(&self, path: &FsPath, source: SocketAddr) -> StorageResult<bool>;
}

/// Data plane of a storage node.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// File size in bytes.
    async fn size(&self, path: &FsPath) -> StorageResult<u64>;

    /// Reads a byte range.
    async fn read(&self, path: &FsPath, offset: u64, length: u64) -> StorageResult<Vec<u8>>;

    /// Writes a byte range.
    async fn write(&self, path: &FsPath, offset: u64, data: &[u8]) -> StorageResult<()>;
}

/// Turns a registered endpoint into a Command stub.
pub trait StorageConnector: Send + Sync {
    /// Stub for the node's Command interface.
    fn command(&self, endpoint: &StorageEndpoint) -> Arc<dyn StorageCommand>;
}
