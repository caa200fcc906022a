#![warn(missing_docs)]

//! HierFS transport subsystem: framed, checksummed request/response RPC over TCP

pub mod channel;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod tcp;

pub use channel::Channel;
pub use error::{CallError, Result, TransportError};
pub use protocol::{Frame, FrameFlags, FrameHeader, Interface};
pub use rpc::{RpcClient, RpcClientConfig, RpcServer, RpcService};
pub use tcp::{TcpConnection, TcpTransport, TcpTransportConfig};
