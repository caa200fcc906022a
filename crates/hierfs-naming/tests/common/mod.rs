//! Shared helpers: a naming node on ephemeral ports and in-memory storage
//! nodes serving the Command interface over TCP.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hierfs_naming::storage::{CommandRequest, CommandResponse};
use hierfs_naming::{FsPath, NamingClient, NamingConfig, NamingServer, RegistrationClient};
use hierfs_transport::{Interface, RpcClientConfig, RpcServer, RpcService, TcpTransport};

pub fn p(s: &str) -> FsPath {
    s.parse().unwrap()
}

pub async fn start_naming(threshold: u32) -> NamingServer {
    let config = NamingConfig {
        service_addr: "127.0.0.1:0".parse().unwrap(),
        registration_addr: "127.0.0.1:0".parse().unwrap(),
        replication_threshold: threshold,
        ..Default::default()
    };
    NamingServer::start(&config).await.unwrap()
}

pub fn naming_client(server: &NamingServer) -> NamingClient {
    NamingClient::connect(server.service_addr())
}

pub fn registration_client(server: &NamingServer) -> RegistrationClient {
    RegistrationClient::new(
        TcpTransport::default(),
        server.registration_addr(),
        RpcClientConfig::default(),
    )
}

/// Storage node double that keeps file names in memory.
#[derive(Default)]
pub struct FakeStorage {
    files: Mutex<BTreeSet<FsPath>>,
    log: Mutex<Vec<CommandRequest>>,
}

impl FakeStorage {
    pub fn has(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains(&p(path))
    }

    pub fn log(&self) -> Vec<CommandRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<FsPath> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                CommandRequest::Delete(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn copies(&self) -> Vec<(FsPath, SocketAddr)> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                CommandRequest::Copy { path, source } => Some((path, source)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RpcService for FakeStorage {
    type Request = CommandRequest;
    type Response = CommandResponse;
    const INTERFACE: Interface = Interface::Command;

    async fn handle(&self, request: CommandRequest) -> CommandResponse {
        self.log.lock().unwrap().push(request.clone());
        let mut files = self.files.lock().unwrap();
        Ok(match request {
            CommandRequest::Create(path) => files.insert(path),
            CommandRequest::Delete(path) => {
                let before = files.len();
                files.retain(|f| !f.is_subpath(&path));
                before != files.len()
            }
            CommandRequest::Copy { path, .. } => {
                files.insert(path);
                true
            }
        })
    }
}

/// A running fake storage node.
pub struct StorageHandle {
    pub storage: Arc<FakeStorage>,
    pub client: SocketAddr,
    pub server: RpcServer,
}

impl StorageHandle {
    pub fn command(&self) -> SocketAddr {
        self.server.local_addr()
    }
}

/// Starts a fake storage node. `client` only identifies the node; nothing
/// listens there.
pub async fn start_storage(client_port: u16) -> StorageHandle {
    let storage = Arc::new(FakeStorage::default());
    let server = RpcServer::bind(
        TcpTransport::default(),
        "127.0.0.1:0".parse().unwrap(),
        storage.clone(),
    )
    .await
    .unwrap();
    StorageHandle {
        storage,
        client: SocketAddr::from(([127, 0, 0, 1], client_port)),
        server,
    }
}
