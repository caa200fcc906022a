//! Frame-level TCP connections.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::error::{Result, TransportError};
use crate::protocol::{Frame, FrameHeader, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Socket options shared by outgoing and accepted connections.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Upper bound on establishing an outgoing connection.
    pub connect_timeout_ms: u64,
    /// Set TCP_NODELAY; frames are small and latency bound.
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            nodelay: true,
        }
    }
}

/// Opens and accepts [`TcpConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    /// Transport with the given socket options.
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }

    /// Connects to `addr`, failing with ConnectionTimeout past the
    /// configured bound.
    pub async fn connect(&self, addr: SocketAddr) -> Result<TcpConnection> {
        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
            Ok(connected) => connected?,
            Err(_) => {
                return Err(TransportError::ConnectionTimeout {
                    addr: addr.to_string(),
                    timeout_ms: self.config.connect_timeout_ms,
                })
            }
        };
        tracing::debug!(%addr, "Connected");
        self.wrap(stream)
    }

    /// Listening socket on `addr`; port 0 picks a free port.
    pub async fn listen(&self, addr: SocketAddr) -> Result<TcpListener> {
        Ok(TcpListener::bind(addr).await?)
    }

    /// Waits for the next incoming connection.
    pub async fn accept(&self, listener: &TcpListener) -> Result<TcpConnection> {
        let (stream, _) = listener.accept().await?;
        self.wrap(stream)
    }

    pub(crate) fn wrap(&self, stream: TcpStream) -> Result<TcpConnection> {
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }
        TcpConnection::from_stream(stream)
    }
}

/// One socket carrying whole frames. Sending and receiving lock separate
/// halves, so a reader task and many senders can share it.
pub struct TcpConnection {
    inbound: Mutex<OwnedReadHalf>,
    outbound: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl TcpConnection {
    pub(crate) fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let (inbound, outbound) = stream.into_split();
        Ok(Self {
            inbound: Mutex::new(inbound),
            outbound: Mutex::new(outbound),
            peer,
        })
    }

    /// Writes one frame; concurrent senders never interleave.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        let mut outbound = self.outbound.lock().await;
        outbound.write_all(&bytes).await?;
        outbound.flush().await?;
        Ok(())
    }

    /// Ends the outgoing direction; the peer reads end of stream.
    pub async fn shutdown(&self) -> Result<()> {
        let mut outbound = self.outbound.lock().await;
        outbound.shutdown().await?;
        Ok(())
    }

    /// Reads the next frame and checks it against its header.
    pub async fn recv_frame(&self) -> Result<Frame> {
        let mut inbound = self.inbound.lock().await;
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        inbound.read_exact(&mut raw).await?;
        let header = FrameHeader::decode(&raw)?;
        if header.payload_length > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: header.payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        let mut payload = vec![0u8; header.payload_length as usize];
        if !payload.is_empty() {
            inbound.read_exact(&mut payload).await?;
        }
        let frame = Frame { header, payload };
        frame.validate()?;
        Ok(frame)
    }

    /// Remote end of the socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
