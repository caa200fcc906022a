//! Naming node process: both interfaces over one shared state.

use std::net::SocketAddr;
use std::sync::Arc;

use hierfs_transport::{RpcClientConfig, RpcServer, TcpTransport, TcpTransportConfig, TransportError};
use tracing::{info, warn};

use crate::config::NamingConfig;
use crate::remote::TcpConnector;
use crate::rpc::{RegistrationEndpoint, ServiceEndpoint};
use crate::service::NamingService;
use crate::storage::StorageConnector;

/// A running naming node.
pub struct NamingServer {
    service: Arc<NamingService>,
    service_rpc: RpcServer,
    registration_rpc: RpcServer,
}

impl NamingServer {
    /// Binds both interfaces; storage nodes are reached over TCP.
    pub async fn start(config: &NamingConfig) -> Result<Self, TransportError> {
        let transport = TcpTransport::new(TcpTransportConfig {
            connect_timeout_ms: config.connect_timeout_ms,
            ..Default::default()
        });
        let connector = TcpConnector::new(
            transport,
            RpcClientConfig {
                response_timeout_ms: Some(config.storage_timeout_ms),
            },
        );
        Self::start_with(config, Arc::new(connector)).await
    }

    /// Binds both interfaces with a custom storage connector.
    pub async fn start_with(
        config: &NamingConfig,
        connector: Arc<dyn StorageConnector>,
    ) -> Result<Self, TransportError> {
        let service = Arc::new(NamingService::new(config.replication_threshold, connector));
        let transport = TcpTransport::default();
        let service_rpc = RpcServer::bind(
            transport.clone(),
            config.service_addr,
            Arc::new(ServiceEndpoint::new(service.clone())),
        )
        .await?;
        let registration_rpc = RpcServer::bind(
            transport,
            config.registration_addr,
            Arc::new(RegistrationEndpoint::new(service.clone())),
        )
        .await?;
        info!(
            service = %service_rpc.local_addr(),
            registration = %registration_rpc.local_addr(),
            threshold = config.replication_threshold,
            "Naming node started"
        );
        Ok(Self {
            service,
            service_rpc,
            registration_rpc,
        })
    }

    /// Bound address of the Service interface.
    pub fn service_addr(&self) -> SocketAddr {
        self.service_rpc.local_addr()
    }

    /// Bound address of the Registration interface.
    pub fn registration_addr(&self) -> SocketAddr {
        self.registration_rpc.local_addr()
    }

    /// Shared state, for in-process inspection.
    pub fn service(&self) -> &Arc<NamingService> {
        &self.service
    }

    /// Stops both interfaces and fails every blocked lock request.
    pub fn stop(&self) {
        self.service_rpc.shutdown();
        self.registration_rpc.shutdown();
        if let Err(e) = self.service.shutdown() {
            warn!(error = %e, "Closing node locks failed");
        }
        info!("Naming node stopped");
    }
}
