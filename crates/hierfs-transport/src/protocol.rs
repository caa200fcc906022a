//! Frame layout of the HierFS RPC protocol.
//!
//! Every message is a fixed 24-byte header followed by a bincode payload.
//! Header (big endian): magic:4 + version:1 + flags:1 + interface:2 +
//! request_id:8 + payload_length:4 + checksum:4. The checksum is the CRC32
//! of the payload.

use crate::error::{Result, TransportError};

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 24;

/// Protocol magic number for frame validation ("HFS" + 0x01).
pub const MAGIC: u32 = 0x4846_5301;

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest payload accepted on a connection (64 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Remote interfaces reachable over the protocol. Each listening socket
/// serves exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Interface {
    /// Naming node: client-facing metadata and locking service.
    Service = 0x0001,
    /// Naming node: storage node join protocol.
    Registration = 0x0002,
    /// Storage node: commands issued by the naming node.
    Command = 0x0003,
    /// Storage node: data plane used by clients and peers.
    Client = 0x0004,
}

impl Interface {
    /// Wire value of the interface.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Interface {
    type Error = TransportError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0001 => Ok(Interface::Service),
            0x0002 => Ok(Interface::Registration),
            0x0003 => Ok(Interface::Command),
            0x0004 => Ok(Interface::Client),
            other => Err(TransportError::UnknownInterface(other)),
        }
    }
}

/// Frame flags for protocol control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No flags set: a request.
    pub const EMPTY: FrameFlags = FrameFlags(0);
    /// The frame answers the request with the same id.
    pub const RESPONSE: FrameFlags = FrameFlags(0x01);
    /// The server could not decode the request; the payload is the reason.
    pub const REJECTED: FrameFlags = FrameFlags(0x02);

    /// Raw byte representation.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Builds flags from the raw byte, dropping unknown bits.
    pub fn from_bits(b: u8) -> Self {
        FrameFlags(b & (Self::RESPONSE.0 | Self::REJECTED.0))
    }

    /// True if every bit of `other` is set.
    pub fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Frame header containing metadata about the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol magic number
    pub magic: u32,
    /// Protocol version
    pub version: u8,
    /// Control flags
    pub flags: FrameFlags,
    /// Interface the frame is addressed to
    pub interface: Interface,
    /// Request ID for multiplexing
    pub request_id: u64,
    /// Payload length in bytes
    pub payload_length: u32,
    /// CRC32 checksum of payload
    pub checksum: u32,
}

impl FrameHeader {
    /// Serializes the header into its fixed-size wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.flags.bits();
        buf[6..8].copy_from_slice(&self.interface.as_u16().to_be_bytes());
        buf[8..16].copy_from_slice(&self.request_id.to_be_bytes());
        buf[16..20].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[20..24].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    /// Parses and validates a header.
    pub fn decode(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<Self> {
        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(TransportError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(TransportError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let interface = Interface::try_from(u16::from_be_bytes([buf[6], buf[7]]))?;
        let mut request_id = [0u8; 8];
        request_id.copy_from_slice(&buf[8..16]);
        Ok(Self {
            magic,
            version,
            flags: FrameFlags::from_bits(buf[5]),
            interface,
            request_id: u64::from_be_bytes(request_id),
            payload_length: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
            checksum: u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]),
        })
    }
}

/// A single frame in the RPC protocol
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Payload data
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a request frame.
    pub fn new(interface: Interface, request_id: u64, payload: Vec<u8>) -> Self {
        let header = FrameHeader {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            flags: FrameFlags::EMPTY,
            interface,
            request_id,
            payload_length: payload.len() as u32,
            checksum: crc32fast::hash(&payload),
        };
        Self { header, payload }
    }

    /// Creates the response to this frame, carrying the same id.
    pub fn make_response(&self, payload: Vec<u8>) -> Frame {
        let mut response = Frame::new(self.header.interface, self.header.request_id, payload);
        response.header.flags = FrameFlags::RESPONSE;
        response
    }

    /// Request identifier.
    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    /// Creates a response telling the caller its request was undecodable.
    pub fn make_rejection(&self, reason: &str) -> Frame {
        let mut response = self.make_response(reason.as_bytes().to_vec());
        response.header.flags = FrameFlags(FrameFlags::RESPONSE.0 | FrameFlags::REJECTED.0);
        response
    }

    /// True if the frame answers a request.
    pub fn is_response(&self) -> bool {
        self.header.flags.contains(FrameFlags::RESPONSE)
    }

    /// Header followed by payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Checks the payload against the header's length and checksum.
    pub fn validate(&self) -> Result<()> {
        if self.payload.len() != self.header.payload_length as usize {
            return Err(TransportError::InvalidFrame {
                reason: format!(
                    "payload is {} bytes, header announced {}",
                    self.payload.len(),
                    self.header.payload_length
                ),
            });
        }
        let computed = crc32fast::hash(&self.payload);
        if computed != self.header.checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: self.header.checksum,
                computed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let frame = Frame::new(Interface::Registration, 42, b"payload".to_vec());
        let bytes = frame.header.encode();
        let decoded = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, frame.header);
        assert_eq!(decoded.payload_length, 7);
        assert!(!frame.is_response());
    }

    #[test]
    fn test_response_keeps_id_and_interface() {
        let request = Frame::new(Interface::Command, 9, vec![1, 2, 3]);
        let response = request.make_response(vec![4]);
        assert!(response.is_response());
        assert_eq!(response.request_id(), 9);
        assert_eq!(response.header.interface, Interface::Command);
        response.validate().unwrap();
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Frame::new(Interface::Client, 1, vec![]).header.encode();
        bytes[0] = 0;
        match FrameHeader::decode(&bytes) {
            Err(TransportError::InvalidMagic { expected, .. }) => assert_eq!(expected, MAGIC),
            other => panic!("expected InvalidMagic, got {:?}", other),
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut bytes = Frame::new(Interface::Client, 1, vec![]).header.encode();
        bytes[4] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(TransportError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_interface_rejected() {
        let mut bytes = Frame::new(Interface::Client, 1, vec![]).header.encode();
        bytes[6] = 0xAB;
        bytes[7] = 0xCD;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(TransportError::UnknownInterface(0xABCD))
        ));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut frame = Frame::new(Interface::Service, 3, b"abc".to_vec());
        frame.payload[1] = b'X';
        assert!(matches!(
            frame.validate(),
            Err(TransportError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_flags_drop_unknown_bits() {
        let flags = FrameFlags::from_bits(0xFF);
        assert!(flags.contains(FrameFlags::RESPONSE));
        assert!(flags.contains(FrameFlags::REJECTED));
        assert_eq!(flags.bits(), 0x03);
    }

    #[test]
    fn test_rejection_is_a_response() {
        let request = Frame::new(Interface::Service, 5, vec![0xFF]);
        let rejection = request.make_rejection("bad request");
        assert!(rejection.is_response());
        assert!(rejection.header.flags.contains(FrameFlags::REJECTED));
        assert_eq!(rejection.payload, b"bad request");
    }
}
