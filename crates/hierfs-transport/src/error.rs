//! Error types for the transport layer.

use thiserror::Error;

/// Failures of the network path itself, independent of what the remote
/// service answered.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting did not complete within the configured timeout.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Remote address.
        addr: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The peer closed the connection while a request was outstanding.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// A frame could not be parsed.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with it.
        reason: String,
    },

    /// The frame did not start with the protocol magic.
    #[error("invalid magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic {
        /// Expected magic.
        expected: u32,
        /// Received magic.
        got: u32,
    },

    /// The peer speaks another protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Local version.
        expected: u8,
        /// Remote version.
        got: u8,
    },

    /// Payload corruption detected by the frame checksum.
    #[error("checksum mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum of the received payload.
        computed: u32,
    },

    /// The announced payload exceeds the protocol limit.
    #[error("payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge {
        /// Announced size.
        size: u32,
        /// Limit.
        max_size: u32,
    },

    /// No response arrived within the configured timeout.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Request identifier.
        request_id: u64,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The frame addresses an interface this endpoint does not serve.
    #[error("unknown interface: 0x{0:04X}")]
    UnknownInterface(u16),

    /// The remote answered with a response of the wrong shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The remote could not decode the request.
    #[error("request rejected by peer: {0}")]
    Rejected(String),

    /// Payload encoding or decoding failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Socket level failure.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl TransportError {
    /// True if the connection this error came from must be dropped.
    ///
    /// A timed-out request is still running on the server; closing the
    /// connection is what cancels it there.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            TransportError::UnexpectedResponse(_)
                | TransportError::Rejected(_)
                | TransportError::SerializationError(_)
        )
    }
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::SerializationError(e.to_string())
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Outcome of a remote call: either the service answered with an
/// application error, or the call never completed.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The remote service processed the request and rejected it.
    #[error("{0}")]
    Service(E),

    /// The request or its response was lost on the way.
    #[error("remote call failed: {0}")]
    Transport(#[from] TransportError),
}

impl<E> CallError<E> {
    /// Returns the application error, if the service produced one.
    pub fn service(&self) -> Option<&E> {
        match self {
            CallError::Service(e) => Some(e),
            CallError::Transport(_) => None,
        }
    }

    /// True if the failure happened in the network rather than the service.
    pub fn is_transport(&self) -> bool {
        matches!(self, CallError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_distinguishes_service_from_transport() {
        let service: CallError<String> = CallError::Service("not found".to_string());
        assert_eq!(service.service().map(String::as_str), Some("not found"));
        assert!(!service.is_transport());

        let transport: CallError<String> = TransportError::ConnectionReset.into();
        assert!(transport.is_transport());
        assert!(transport.service().is_none());
        assert_eq!(
            transport.to_string(),
            "remote call failed: connection reset by peer"
        );
    }

    #[test]
    fn test_timeout_drops_connection() {
        let err = TransportError::RequestTimeout {
            request_id: 7,
            timeout_ms: 10,
        };
        assert!(err.is_connection_fatal());
        assert!(TransportError::ConnectionReset.is_connection_fatal());
        assert!(!TransportError::Rejected("bad".into()).is_connection_fatal());
    }
}
