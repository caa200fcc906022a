//! TCP stubs for the storage node interfaces.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hierfs_transport::{CallError, Channel, Interface, RpcClientConfig, TcpTransport, TransportError};

use crate::path::FsPath;
use crate::storage::{
    ClientReply, ClientRequest, CommandRequest, StorageClient, StorageCommand, StorageConnector,
    StorageError, StorageResult,
};
use crate::types::StorageEndpoint;

/// Command interface of a remote storage node.
pub struct RemoteCommand {
    channel: Channel,
}

impl RemoteCommand {
    /// Stub for the Command interface at `addr`. Connects on first use.
    pub fn new(transport: TcpTransport, addr: SocketAddr, config: RpcClientConfig) -> Self {
        Self {
            channel: Channel::new(transport, addr, Interface::Command, config),
        }
    }

    async fn send(&self, request: CommandRequest) -> StorageResult<bool> {
        self.channel
            .call_service::<_, bool, StorageError>(&request)
            .await
    }
}

#[async_trait]
impl StorageCommand for RemoteCommand {
    async fn create(&self, path: &FsPath) -> StorageResult<bool> {
        self.send(CommandRequest::Create(path.clone())).await
    }

    async fn delete(&self, path: &FsPath) -> StorageResult<bool> {
        self.send(CommandRequest::Delete(path.clone())).await
    }

    async fn copy(&self, path: &FsPath, source: SocketAddr) -> StorageResult<bool> {
        self.send(CommandRequest::Copy {
            path: path.clone(),
            source,
        })
        .await
    }
}

/// Client interface of a remote storage node.
pub struct RemoteClient {
    channel: Channel,
}

impl RemoteClient {
    /// Stub for the Client interface at `addr`. Connects on first use.
    pub fn new(transport: TcpTransport, addr: SocketAddr, config: RpcClientConfig) -> Self {
        Self {
            channel: Channel::new(transport, addr, Interface::Client, config),
        }
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.channel.addr()
    }

    async fn send(&self, request: &ClientRequest) -> StorageResult<ClientReply> {
        self.channel
            .call_service::<_, ClientReply, StorageError>(request)
            .await
    }
}

fn unexpected(reply: ClientReply) -> CallError<StorageError> {
    CallError::Transport(TransportError::UnexpectedResponse(format!("{:?}", reply)))
}

#[async_trait]
impl StorageClient for RemoteClient {
    async fn size(&self, path: &FsPath) -> StorageResult<u64> {
        match self.send(&ClientRequest::Size(path.clone())).await? {
            ClientReply::Size(size) => Ok(size),
            other => Err(unexpected(other)),
        }
    }

    async fn read(&self, path: &FsPath, offset: u64, length: u64) -> StorageResult<Vec<u8>> {
        let request = ClientRequest::Read {
            path: path.clone(),
            offset,
            length,
        };
        match self.send(&request).await? {
            ClientReply::Data(data) => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    async fn write(&self, path: &FsPath, offset: u64, data: &[u8]) -> StorageResult<()> {
        let request = ClientRequest::Write {
            path: path.clone(),
            offset,
            data: data.to_vec(),
        };
        match self.send(&request).await? {
            ClientReply::Written => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

/// Builds TCP Command stubs for registering storage nodes.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    transport: TcpTransport,
    config: RpcClientConfig,
}

impl TcpConnector {
    /// Creates a connector.
    pub fn new(transport: TcpTransport, config: RpcClientConfig) -> Self {
        Self { transport, config }
    }
}

impl StorageConnector for TcpConnector {
    fn command(&self, endpoint: &StorageEndpoint) -> Arc<dyn StorageCommand> {
        Arc::new(RemoteCommand::new(
            self.transport.clone(),
            endpoint.command,
            self.config.clone(),
        ))
    }
}
