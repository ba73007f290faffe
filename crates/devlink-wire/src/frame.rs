//! The `Frame` wire unit (spec.md §3, §4.1).

/// Protocol dialect carried in a frame's 3-byte ASCII version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Legacy local and all MQTT traffic: AES-128-ECB payload crypto.
    V1_0,
    /// Modern local traffic: AES-128-CBC payload crypto with a
    /// per-connection nonce-derived key and IV.
    L01,
}

impl ProtocolVersion {
    pub const fn as_bytes(self) -> [u8; 3] {
        match self {
            Self::V1_0 => *b"1.0",
            Self::L01 => *b"L01",
        }
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Option<Self> {
        match &bytes {
            b"1.0" => Some(Self::V1_0),
            b"L01" => Some(Self::L01),
            _ => None,
        }
    }
}

/// Small-integer protocol tags distinguishing frame purpose on the wire.
///
/// Exact numeric values are an internal convention of this crate (the
/// upstream device firmware's real tag values are not part of this
/// specification); what matters is that encoder and decoder agree, which
/// they do because both live here.
pub mod protocol_tag {
    pub const HELLO_REQUEST: u16 = 1;
    pub const HELLO_RESPONSE: u16 = 2;
    pub const PING_REQUEST: u16 = 3;
    pub const PING_RESPONSE: u16 = 4;
    pub const RPC_REQUEST: u16 = 101;
    pub const RPC_RESPONSE: u16 = 102;
    pub const GENERAL_REQUEST: u16 = 300;
    pub const GENERAL_RESPONSE: u16 = 301;
    pub const MAP_RESPONSE: u16 = 400;
}

/// Fixed two-byte sync prefix identifying the wire.
pub const MAGIC: [u8; 2] = [0xA5, 0x5A];

/// A decoded wire frame (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub protocol: u16,
    pub sequence: u32,
    pub random: u32,
    pub timestamp: u32,
    pub version: ProtocolVersion,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a HELLO or PING frame: zero-length payload, no crypto.
    pub fn control(protocol: u16, version: ProtocolVersion, sequence: u32, random: u32, timestamp: u32) -> Self {
        Self {
            protocol,
            sequence,
            random,
            timestamp,
            version,
            payload: Vec::new(),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self.protocol,
            protocol_tag::HELLO_REQUEST
                | protocol_tag::HELLO_RESPONSE
                | protocol_tag::PING_REQUEST
                | protocol_tag::PING_RESPONSE
        )
    }
}
