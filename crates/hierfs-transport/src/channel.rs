//! Lazily connected, self-healing handle to one remote interface.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CallError, Result};
use crate::protocol::Interface;
use crate::rpc::{RpcClient, RpcClientConfig};
use crate::tcp::TcpTransport;

/// Connects on first use and reconnects on the next call after the
/// connection failed. A failed call is never retried. A call that times out
/// closes the connection, which cancels the request on the server.
pub struct Channel {
    transport: TcpTransport,
    addr: SocketAddr,
    interface: Interface,
    config: RpcClientConfig,
    client: Mutex<Option<Arc<RpcClient>>>,
}

impl Channel {
    /// Creates a channel; nothing is connected yet.
    pub fn new(
        transport: TcpTransport,
        addr: SocketAddr,
        interface: Interface,
        config: RpcClientConfig,
    ) -> Self {
        Self {
            transport,
            addr,
            interface,
            config,
            client: Mutex::new(None),
        }
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn client(&self) -> Result<Arc<RpcClient>> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
            debug!(addr = %self.addr, "Reconnecting closed channel");
        }
        let client = Arc::new(
            RpcClient::connect(&self.transport, self.addr, self.interface, self.config.clone())
                .await?,
        );
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Sends a request and decodes the response.
    pub async fn call<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let client = self.client().await?;
        match client.call(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_connection_fatal() {
                    {
                        let mut slot = self.client.lock().await;
                        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, &client)) {
                            *slot = None;
                        }
                    }
                    client.close().await;
                }
                Err(e)
            }
        }
    }

    /// Calls a service whose responses are `Result<T, E>`, separating the
    /// service's own errors from transport failures.
    pub async fn call_service<Req, T, E>(&self, request: &Req) -> std::result::Result<T, CallError<E>>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let response: std::result::Result<T, E> = self.call(request).await?;
        response.map_err(CallError::Service)
    }
}
