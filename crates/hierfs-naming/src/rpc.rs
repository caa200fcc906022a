//! Wire messages of the Service and Registration interfaces, the server
//! side endpoints and the client stubs.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hierfs_transport::{CallError, Channel, Interface, RpcClientConfig, RpcService, TcpTransport, TransportError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::path::FsPath;
use crate::service::NamingService;
use crate::types::NamingError;

/// Requests on the Service interface. Paths travel in their string form
/// and are validated by the receiving node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceRequest {
    /// Lock a path.
    Lock {
        /// Path to lock.
        path: String,
        /// Exclusive rather than shared.
        exclusive: bool,
    },
    /// Unlock a path.
    Unlock {
        /// Path to unlock.
        path: String,
        /// Mode it was locked in.
        exclusive: bool,
    },
    /// Directory test.
    IsDirectory(String),
    /// Directory listing.
    List(String),
    /// Create an empty file.
    CreateFile(String),
    /// Create a directory.
    CreateDirectory(String),
    /// Delete a file or directory tree.
    Delete(String),
    /// Locate a storage node hosting a file.
    GetStorage(String),
}

/// Successful replies on the Service interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceReply {
    /// Lock or unlock completed.
    Done,
    /// Boolean answer.
    Flag(bool),
    /// Directory entries.
    Entries(Vec<String>),
    /// Client address of a storage node.
    Storage(SocketAddr),
}

/// Responses on the Service interface.
pub type ServiceResponse = Result<ServiceReply, NamingError>;

/// Request on the Registration interface. Absent fields are reported as
/// NullArgument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Client interface address of the joining node.
    pub client: Option<SocketAddr>,
    /// Command interface address of the joining node.
    pub command: Option<SocketAddr>,
    /// Files present on the node, as path strings.
    pub files: Option<Vec<String>>,
}

/// Response on the Registration interface: the duplicates to delete.
pub type RegisterResponse = Result<Vec<FsPath>, NamingError>;

/// Serves the Service interface.
pub struct ServiceEndpoint {
    service: Arc<NamingService>,
}

impl ServiceEndpoint {
    /// Wraps the shared naming state.
    pub fn new(service: Arc<NamingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RpcService for ServiceEndpoint {
    type Request = ServiceRequest;
    type Response = ServiceResponse;
    const INTERFACE: Interface = Interface::Service;

    async fn handle(&self, request: ServiceRequest) -> ServiceResponse {
        debug!(?request, "Service request");
        let service = &self.service;
        match request {
            ServiceRequest::Lock { path, exclusive } => service
                .lock(&parse(&path)?, exclusive)
                .await
                .map(|_| ServiceReply::Done),
            ServiceRequest::Unlock { path, exclusive } => service
                .unlock(&parse(&path)?, exclusive)
                .await
                .map(|_| ServiceReply::Done),
            ServiceRequest::IsDirectory(path) => {
                service.is_directory(&parse(&path)?).map(ServiceReply::Flag)
            }
            ServiceRequest::List(path) => service.list(&parse(&path)?).map(ServiceReply::Entries),
            ServiceRequest::CreateFile(path) => service
                .create_file(&parse(&path)?)
                .await
                .map(ServiceReply::Flag),
            ServiceRequest::CreateDirectory(path) => service
                .create_directory(&parse(&path)?)
                .map(ServiceReply::Flag),
            ServiceRequest::Delete(path) => {
                service.delete(&parse(&path)?).await.map(ServiceReply::Flag)
            }
            ServiceRequest::GetStorage(path) => service
                .get_storage(&parse(&path)?)
                .map(ServiceReply::Storage),
        }
    }
}

fn parse(raw: &str) -> Result<FsPath, NamingError> {
    Ok(raw.parse::<FsPath>()?)
}

/// Serves the Registration interface.
pub struct RegistrationEndpoint {
    service: Arc<NamingService>,
}

impl RegistrationEndpoint {
    /// Wraps the shared naming state.
    pub fn new(service: Arc<NamingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RpcService for RegistrationEndpoint {
    type Request = RegisterRequest;
    type Response = RegisterResponse;
    const INTERFACE: Interface = Interface::Registration;

    async fn handle(&self, request: RegisterRequest) -> RegisterResponse {
        let files = match request.files {
            Some(raw) => Some(raw.iter().map(|f| parse(f)).collect::<Result<Vec<_>, _>>()?),
            None => None,
        };
        self.service
            .register(request.client, request.command, files)
            .await
    }
}

/// Result of a call to the naming node.
pub type NamingResult<T> = Result<T, CallError<NamingError>>;

fn unexpected(reply: ServiceReply) -> CallError<NamingError> {
    CallError::Transport(TransportError::UnexpectedResponse(format!("{:?}", reply)))
}

/// Client stub for the Service interface.
pub struct NamingClient {
    channel: Channel,
}

impl NamingClient {
    /// Stub for the Service interface at `addr`.
    ///
    /// `lock` waits for as long as the lock is contended, so a response
    /// timeout in `config` also bounds how long a caller may wait for a lock.
    pub fn new(transport: TcpTransport, addr: SocketAddr, config: RpcClientConfig) -> Self {
        Self {
            channel: Channel::new(transport, addr, Interface::Service, config),
        }
    }

    /// Stub without a response timeout.
    pub fn connect(addr: SocketAddr) -> Self {
        Self::new(
            TcpTransport::default(),
            addr,
            RpcClientConfig {
                response_timeout_ms: None,
            },
        )
    }

    async fn send(&self, request: &ServiceRequest) -> NamingResult<ServiceReply> {
        self.channel
            .call_service::<_, ServiceReply, NamingError>(request)
            .await
    }

    async fn flag(&self, request: &ServiceRequest) -> NamingResult<bool> {
        match self.send(request).await? {
            ServiceReply::Flag(flag) => Ok(flag),
            other => Err(unexpected(other)),
        }
    }

    async fn done(&self, request: &ServiceRequest) -> NamingResult<()> {
        match self.send(request).await? {
            ServiceReply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Locks `path`.
    pub async fn lock(&self, path: &FsPath, exclusive: bool) -> NamingResult<()> {
        self.done(&ServiceRequest::Lock {
            path: path.to_string(),
            exclusive,
        })
        .await
    }

    /// Unlocks `path`.
    pub async fn unlock(&self, path: &FsPath, exclusive: bool) -> NamingResult<()> {
        self.done(&ServiceRequest::Unlock {
            path: path.to_string(),
            exclusive,
        })
        .await
    }

    /// True for directories.
    pub async fn is_directory(&self, path: &FsPath) -> NamingResult<bool> {
        self.flag(&ServiceRequest::IsDirectory(path.to_string())).await
    }

    /// Entries of a directory.
    pub async fn list(&self, path: &FsPath) -> NamingResult<Vec<String>> {
        match self.send(&ServiceRequest::List(path.to_string())).await? {
            ServiceReply::Entries(entries) => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    /// Creates a file.
    pub async fn create_file(&self, path: &FsPath) -> NamingResult<bool> {
        self.flag(&ServiceRequest::CreateFile(path.to_string())).await
    }

    /// Creates a directory.
    pub async fn create_directory(&self, path: &FsPath) -> NamingResult<bool> {
        self.flag(&ServiceRequest::CreateDirectory(path.to_string())).await
    }

    /// Deletes a file or directory.
    pub async fn delete(&self, path: &FsPath) -> NamingResult<bool> {
        self.flag(&ServiceRequest::Delete(path.to_string())).await
    }

    /// Client address of a storage node hosting `path`.
    pub async fn get_storage(&self, path: &FsPath) -> NamingResult<SocketAddr> {
        match self.send(&ServiceRequest::GetStorage(path.to_string())).await? {
            ServiceReply::Storage(addr) => Ok(addr),
            other => Err(unexpected(other)),
        }
    }
}

/// Client stub for the Registration interface.
pub struct RegistrationClient {
    channel: Channel,
}

impl RegistrationClient {
    /// Stub for the Registration interface at `addr`.
    pub fn new(transport: TcpTransport, addr: SocketAddr, config: RpcClientConfig) -> Self {
        Self {
            channel: Channel::new(transport, addr, Interface::Registration, config),
        }
    }

    /// Registers a storage node, returning the duplicates it must delete.
    pub async fn register(
        &self,
        client: SocketAddr,
        command: SocketAddr,
        files: Vec<FsPath>,
    ) -> NamingResult<Vec<FsPath>> {
        self.send(RegisterRequest {
            client: Some(client),
            command: Some(command),
            files: Some(files.iter().map(FsPath::to_string).collect()),
        })
        .await
    }

    /// Sends a raw request, absent fields included.
    pub async fn send(&self, request: RegisterRequest) -> NamingResult<Vec<FsPath>> {
        self.channel
            .call_service::<_, Vec<FsPath>, NamingError>(&request)
            .await
    }
}
