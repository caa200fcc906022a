//! Storage node process: the Client and Command interfaces over a
//! [`LocalStore`], and the join protocol with the naming node.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hierfs_naming::storage::{
    ClientReply, ClientRequest, ClientResponse, CommandRequest, CommandResponse, StorageClient,
    StorageError,
};
use hierfs_naming::{FsPath, NamingError, RegistrationClient, RemoteClient};
use hierfs_transport::{
    CallError, Interface, RpcClientConfig, RpcServer, RpcService, TcpTransport, TcpTransportConfig,
    TransportError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::store::{LocalStore, StagedFile};

/// Failures while bringing a storage node up.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The local store could not be opened or walked.
    #[error("local store: {0}")]
    Store(#[from] StorageError),

    /// An interface could not be bound.
    #[error("binding interfaces: {0}")]
    Bind(#[from] TransportError),

    /// The naming node refused or could not be reached.
    #[error("registration: {0}")]
    Registration(#[from] CallError<NamingError>),
}

/// Serves the Client interface.
pub struct ClientEndpoint {
    store: Arc<LocalStore>,
}

impl ClientEndpoint {
    /// Wraps a store.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RpcService for ClientEndpoint {
    type Request = ClientRequest;
    type Response = ClientResponse;
    const INTERFACE: Interface = Interface::Client;

    async fn handle(&self, request: ClientRequest) -> ClientResponse {
        match request {
            ClientRequest::Size(path) => self.store.size(&path).await.map(ClientReply::Size),
            ClientRequest::Read {
                path,
                offset,
                length,
            } => self.store.read(&path, offset, length).await.map(ClientReply::Data),
            ClientRequest::Write { path, offset, data } => self
                .store
                .write(&path, offset, &data)
                .await
                .map(|_| ClientReply::Written),
        }
    }
}

/// Serves the Command interface.
pub struct CommandEndpoint {
    store: Arc<LocalStore>,
    transport: TcpTransport,
    peer_config: RpcClientConfig,
    chunk_size: u64,
}

impl CommandEndpoint {
    /// Wraps a store; copies pull `chunk_size` bytes per request.
    pub fn new(
        store: Arc<LocalStore>,
        transport: TcpTransport,
        peer_config: RpcClientConfig,
        chunk_size: u64,
    ) -> Self {
        Self {
            store,
            transport,
            peer_config,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Replaces any local copy of `path` with the one at `source`.
    pub async fn copy_from(&self, path: &FsPath, source: SocketAddr) -> Result<bool, StorageError> {
        let peer = RemoteClient::new(self.transport.clone(), source, self.peer_config.clone());
        copy_file(&self.store, &peer, path, self.chunk_size).await
    }
}

/// Pulls `path` from `peer` into `store` in `chunk_size` pieces. The local
/// copy is replaced only once every chunk has arrived.
pub async fn copy_file(
    store: &LocalStore,
    peer: &dyn StorageClient,
    path: &FsPath,
    chunk_size: u64,
) -> Result<bool, StorageError> {
    let size = peer.size(path).await.map_err(peer_error)?;
    let staged = store.stage().await?;
    let outcome = match pull(store, peer, path, &staged, size, chunk_size).await {
        Ok(()) => store.commit(&staged, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        warn!(%path, error = %e, "Copy from peer failed");
        if let Err(cleanup) = store.discard(staged).await {
            warn!(%path, error = %cleanup, "Failed to discard staged copy");
        }
        return Err(e);
    }
    info!(%path, bytes = size, "Copied file from peer");
    Ok(true)
}

async fn pull(
    store: &LocalStore,
    peer: &dyn StorageClient,
    path: &FsPath,
    staged: &StagedFile,
    size: u64,
    chunk_size: u64,
) -> Result<(), StorageError> {
    let mut offset = 0;
    while offset < size {
        let length = chunk_size.min(size - offset);
        let data = peer.read(path, offset, length).await.map_err(peer_error)?;
        store.append_staged(staged, &data).await?;
        offset += length;
    }
    Ok(())
}

fn peer_error(e: CallError<StorageError>) -> StorageError {
    StorageError::Peer(e.to_string())
}

#[async_trait]
impl RpcService for CommandEndpoint {
    type Request = CommandRequest;
    type Response = CommandResponse;
    const INTERFACE: Interface = Interface::Command;

    async fn handle(&self, request: CommandRequest) -> CommandResponse {
        debug!(?request, "Command");
        match request {
            CommandRequest::Create(path) => self.store.create(&path).await,
            CommandRequest::Delete(path) => self.store.delete(&path).await,
            CommandRequest::Copy { path, source } => self.copy_from(&path, source).await,
        }
    }
}

/// A running storage node.
pub struct StorageServer {
    store: Arc<LocalStore>,
    client_rpc: RpcServer,
    command_rpc: RpcServer,
}

impl StorageServer {
    /// Opens the store, binds both interfaces, registers with the naming
    /// node, deletes the duplicates it reports and prunes empty directories.
    pub async fn start(config: &StorageConfig) -> Result<Self, NodeError> {
        let store = Arc::new(LocalStore::open(&config.root).await?);
        let transport = TcpTransport::new(TcpTransportConfig {
            connect_timeout_ms: config.connect_timeout_ms,
            ..Default::default()
        });
        let rpc_config = RpcClientConfig {
            response_timeout_ms: Some(config.response_timeout_ms),
        };

        let client_rpc = RpcServer::bind(
            transport.clone(),
            config.client_addr,
            Arc::new(ClientEndpoint::new(store.clone())),
        )
        .await?;
        let command_rpc = RpcServer::bind(
            transport.clone(),
            config.command_addr,
            Arc::new(CommandEndpoint::new(
                store.clone(),
                transport.clone(),
                rpc_config.clone(),
                config.copy_chunk_size,
            )),
        )
        .await?;

        let client_addr = config.advertised(client_rpc.local_addr());
        let command_addr = config.advertised(command_rpc.local_addr());
        let files = store.files().await?;
        info!(%client_addr, %command_addr, files = files.len(), naming = %config.naming_addr, "Registering");

        let registration = RegistrationClient::new(transport, config.naming_addr, rpc_config);
        let duplicates = registration.register(client_addr, command_addr, files).await?;
        for path in &duplicates {
            if let Err(e) = store.delete(path).await {
                warn!(%path, error = %e, "Failed to delete duplicate");
            }
        }
        let pruned = store.prune_empty_dirs().await?;
        info!(duplicates = duplicates.len(), pruned, "Storage node started");

        Ok(Self {
            store,
            client_rpc,
            command_rpc,
        })
    }

    /// Bound address of the Client interface.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_rpc.local_addr()
    }

    /// Bound address of the Command interface.
    pub fn command_addr(&self) -> SocketAddr {
        self.command_rpc.local_addr()
    }

    /// Local store.
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Stops both interfaces.
    pub fn stop(&self) {
        self.client_rpc.shutdown();
        self.command_rpc.shutdown();
        info!("Storage node stopped");
    }
}
