//! RPC layer providing request/response semantics over TCP connections.
//!
//! A server serves one [`Interface`]. Every connection gets its own task and
//! every request on it is answered from a separate task, so a request that
//! waits (for a lock, for a peer) never delays the other requests sharing the
//! connection. Dropping the server aborts its connections and their
//! in-flight requests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::protocol::{Frame, FrameFlags, Interface};
use crate::tcp::{TcpConnection, TcpTransport};

/// Configuration for RPC client.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Response timeout in milliseconds; `None` waits indefinitely.
    pub response_timeout_ms: Option<u64>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: Some(30_000),
        }
    }
}

/// A typed service exposed on one interface.
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    /// Decoded request type.
    type Request: DeserializeOwned + Send + 'static;
    /// Response type, application errors included.
    type Response: Serialize + Send + 'static;
    /// Interface this service answers.
    const INTERFACE: Interface;

    /// Handles one request.
    async fn handle(&self, request: Self::Request) -> Self::Response;
}

/// RPC client multiplexing requests over a single connection.
pub struct RpcClient {
    conn: Arc<TcpConnection>,
    interface: Interface,
    config: RpcClientConfig,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl RpcClient {
    /// Connects to `addr` and starts the response reader.
    pub async fn connect(
        transport: &TcpTransport,
        addr: SocketAddr,
        interface: Interface,
        config: RpcClientConfig,
    ) -> Result<Self> {
        let conn = transport.connect(addr).await?;
        Ok(Self::new(Arc::new(conn), interface, config))
    }

    /// Create a new RPC client. Starts a background reader task.
    pub fn new(conn: Arc<TcpConnection>, interface: Interface, config: RpcClientConfig) -> Self {
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader_conn = conn.clone();
        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader = tokio::spawn(async move {
            loop {
                match reader_conn.recv_frame().await {
                    Ok(frame) if frame.is_response() => {
                        let mut map = reader_pending.lock().await;
                        if let Some(tx) = map.remove(&frame.request_id()) {
                            let _ = tx.send(frame);
                        }
                    }
                    Ok(frame) => {
                        warn!(request_id = frame.request_id(), "ignoring request frame on client connection");
                    }
                    Err(e) => {
                        debug!(error = %e, "RPC reader stopping");
                        break;
                    }
                }
            }
            // Waiters observe the dropped senders as a reset connection.
            let mut map = reader_pending.lock().await;
            reader_closed.store(true, Ordering::Release);
            map.clear();
        });
        Self {
            conn,
            interface,
            config,
            next_id: AtomicU64::new(1),
            pending,
            closed,
            reader,
        }
    }

    /// True once the connection is gone; every later call fails.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the connection. The server aborts the requests it still runs
    /// for it; calls waiting here fail with ConnectionReset.
    pub async fn close(&self) {
        if let Err(e) = self.conn.shutdown().await {
            debug!(peer = %self.conn.peer_addr(), error = %e, "Shutdown failed");
        }
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// Sends a request and waits for the decoded response.
    pub async fn call<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = bincode::serialize(request)?;
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            if self.is_closed() {
                return Err(TransportError::ConnectionReset);
            }
            map.insert(request_id, tx);
        }

        let frame = Frame::new(self.interface, request_id, payload);
        if let Err(e) = self.conn.send_frame(&frame).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        let response = match self.config.response_timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
                    Ok(received) => received.map_err(|_| TransportError::ConnectionReset)?,
                    Err(_) => {
                        self.pending.lock().await.remove(&request_id);
                        return Err(TransportError::RequestTimeout {
                            request_id,
                            timeout_ms,
                        });
                    }
                }
            }
            None => rx.await.map_err(|_| TransportError::ConnectionReset)?,
        };

        if response.header.flags.contains(FrameFlags::REJECTED) {
            return Err(TransportError::Rejected(
                String::from_utf8_lossy(&response.payload).into_owned(),
            ));
        }
        Ok(bincode::deserialize(&response.payload)?)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// A listening RPC server. The accept loop stops when the server is shut
/// down or dropped.
pub struct RpcServer {
    local_addr: SocketAddr,
    interface: Interface,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Binds `addr` and starts serving `service`.
    pub async fn bind<S: RpcService>(
        transport: TcpTransport,
        addr: SocketAddr,
        service: Arc<S>,
    ) -> Result<Self> {
        let listener = transport.listen(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, interface = ?S::INTERFACE, "RPC server listening");
        let accept_task = tokio::spawn(accept_loop(transport, listener, service));
        Ok(Self {
            local_addr,
            interface: S::INTERFACE,
            accept_task,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and aborts every connection.
    pub fn shutdown(&self) {
        if !self.accept_task.is_finished() {
            info!(local_addr = %self.local_addr, interface = ?self.interface, "RPC server stopping");
        }
        self.accept_task.abort();
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop<S: RpcService>(transport: TcpTransport, listener: TcpListener, service: Arc<S>) {
    let mut connections = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "Accepted connection");
                match transport.wrap(stream) {
                    Ok(conn) => {
                        connections.spawn(serve_connection(Arc::new(conn), service.clone()));
                    }
                    Err(e) => warn!(%peer, error = %e, "Failed to set up connection"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        while connections.try_join_next().is_some() {}
    }
}

async fn serve_connection<S: RpcService>(conn: Arc<TcpConnection>, service: Arc<S>) {
    let peer = conn.peer_addr();
    let mut requests = JoinSet::new();
    loop {
        let frame = match conn.recv_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%peer, error = %e, "Connection closed");
                break;
            }
        };
        if frame.is_response() || frame.header.interface != S::INTERFACE {
            warn!(%peer, interface = ?frame.header.interface, "Frame not addressed to this service, closing");
            break;
        }
        while requests.try_join_next().is_some() {}
        requests.spawn(answer(conn.clone(), service.clone(), frame));
    }
}

async fn answer<S: RpcService>(conn: Arc<TcpConnection>, service: Arc<S>, frame: Frame) {
    let response = match bincode::deserialize::<S::Request>(&frame.payload) {
        Ok(request) => {
            let response = service.handle(request).await;
            match bincode::serialize(&response) {
                Ok(payload) => frame.make_response(payload),
                Err(e) => {
                    warn!(error = %e, "Failed to encode response");
                    frame.make_rejection(&format!("response encoding failed: {}", e))
                }
            }
        }
        Err(e) => {
            warn!(peer = %conn.peer_addr(), error = %e, "Undecodable request");
            frame.make_rejection(&e.to_string())
        }
    };
    if let Err(e) = conn.send_frame(&response).await {
        debug!(peer = %conn.peer_addr(), error = %e, "Failed to send response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    enum EchoRequest {
        Echo(String),
        Wait(u64),
    }

    struct EchoService;

    #[async_trait]
    impl RpcService for EchoService {
        type Request = EchoRequest;
        type Response = String;
        const INTERFACE: Interface = Interface::Client;

        async fn handle(&self, request: EchoRequest) -> String {
            match request {
                EchoRequest::Echo(text) => text,
                EchoRequest::Wait(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    format!("waited {}", ms)
                }
            }
        }
    }

    async fn start() -> RpcServer {
        RpcServer::bind(
            TcpTransport::default(),
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(EchoService),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_rpc_roundtrip() {
        let server = start().await;
        let client = RpcClient::connect(
            &TcpTransport::default(),
            server.local_addr(),
            Interface::Client,
            RpcClientConfig::default(),
        )
        .await
        .unwrap();

        let response: String = client.call(&EchoRequest::Echo("hello".into())).await.unwrap();
        assert_eq!(response, "hello");
    }

    #[tokio::test]
    async fn test_slow_request_does_not_block_connection() {
        let server = start().await;
        let client = Arc::new(
            RpcClient::connect(
                &TcpTransport::default(),
                server.local_addr(),
                Interface::Client,
                RpcClientConfig::default(),
            )
            .await
            .unwrap(),
        );

        let slow_client = client.clone();
        let slow = tokio::spawn(async move {
            slow_client.call::<_, String>(&EchoRequest::Wait(500)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fast = tokio::time::timeout(
            Duration::from_millis(300),
            client.call::<_, String>(&EchoRequest::Echo("fast".into())),
        )
        .await
        .expect("fast request stuck behind slow one")
        .unwrap();
        assert_eq!(fast, "fast");
        assert_eq!(slow.await.unwrap().unwrap(), "waited 500");
    }

    #[tokio::test]
    async fn test_wrong_interface_closes_connection() {
        let server = start().await;
        let client = RpcClient::connect(
            &TcpTransport::default(),
            server.local_addr(),
            Interface::Service,
            RpcClientConfig::default(),
        )
        .await
        .unwrap();

        let result = client.call::<_, String>(&EchoRequest::Echo("x".into())).await;
        assert!(matches!(result, Err(TransportError::ConnectionReset)));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_undecodable_request_is_rejected() {
        let server = start().await;
        let client = RpcClient::connect(
            &TcpTransport::default(),
            server.local_addr(),
            Interface::Client,
            RpcClientConfig::default(),
        )
        .await
        .unwrap();

        // Variant index 7 does not exist in EchoRequest.
        let result = client.call::<_, String>(&7u32).await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_response_timeout() {
        let server = start().await;
        let client = RpcClient::connect(
            &TcpTransport::default(),
            server.local_addr(),
            Interface::Client,
            RpcClientConfig {
                response_timeout_ms: Some(20),
            },
        )
        .await
        .unwrap();

        let result = client.call::<_, String>(&EchoRequest::Wait(200)).await;
        assert!(matches!(result, Err(TransportError::RequestTimeout { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_resets_clients() {
        let server = start().await;
        let client = RpcClient::connect(
            &TcpTransport::default(),
            server.local_addr(),
            Interface::Client,
            RpcClientConfig::default(),
        )
        .await
        .unwrap();
        let _: String = client.call(&EchoRequest::Echo("up".into())).await.unwrap();

        server.shutdown();
        let result = client.call::<_, String>(&EchoRequest::Wait(100)).await;
        assert!(result.is_err());
    }
}
