//! Cairn wire format — records exchanged with the index registry and
//! between peers.
//!
//! The raw layouts below match the records deployed peers and index servers
//! put on the wire (little-endian Linux hosts), padding included. Treat any
//! change to them as a protocol break.
//!
//! Raw layouts are #[repr(C, packed)] with zerocopy derives. The rest of the
//! workspace works with the typed `ControlRecord` and `SimpleRecord`.

use std::net::{Ipv4Addr, SocketAddrV4};

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Width of a name field, including the terminating NUL.
pub const NAME_LEN: usize = 10;

/// Width of the SimpleRecord text field, including the terminating NUL.
pub const TEXT_LEN: usize = 100;

/// Maximum payload carried by one content frame produced by a publisher.
pub const CHUNK_SIZE: usize = 1024;

/// Default UDP port of the index registry.
pub const DEFAULT_INDEX_PORT: u16 = 3000;

/// Default number of simultaneously active catalog entries.
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// How long a peer waits for a Search reply before giving up.
pub const SEARCH_TIMEOUT_SECS: u64 = 5;

/// `sin_family` value for IPv4, stored in host byte order.
const AF_INET: u16 = 2;

// ── Kind ──────────────────────────────────────────────────────────────────────

/// One-byte record tag shared by every record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Register = b'R',
    Download = b'D',
    Search = b'S',
    Deregister = b'T',
    Online = b'O',
    Acknowledge = b'A',
    Error = b'E',
    Content = b'C',
    Quit = b'Q',
}

impl Kind {
    /// Kinds the index registry accepts as requests.
    pub fn is_index_request(self) -> bool {
        matches!(
            self,
            Kind::Register | Kind::Search | Kind::Deregister | Kind::Online | Kind::Quit
        )
    }
}

impl TryFrom<u8> for Kind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            b'R' => Ok(Kind::Register),
            b'D' => Ok(Kind::Download),
            b'S' => Ok(Kind::Search),
            b'T' => Ok(Kind::Deregister),
            b'O' => Ok(Kind::Online),
            b'A' => Ok(Kind::Acknowledge),
            b'E' => Ok(Kind::Error),
            b'C' => Ok(Kind::Content),
            b'Q' => Ok(Kind::Quit),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<Kind> for u8 {
    fn from(k: Kind) -> u8 {
        k as u8
    }
}

// ── Raw layouts ───────────────────────────────────────────────────────────────

/// IPv4 socket address laid out as a `sockaddr_in`.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RawSockAddr {
    /// Address family, host byte order. `AF_INET` or zero for "no address".
    pub family: [u8; 2],
    /// Port, network byte order.
    pub port: [u8; 2],
    /// IPv4 address, network byte order.
    pub ip: [u8; 4],
    /// Must be zero.
    pub zero: [u8; 8],
}

assert_eq_size!(RawSockAddr, [u8; 16]);

impl RawSockAddr {
    pub fn from_addr(addr: Option<SocketAddrV4>) -> Self {
        match addr {
            None => Self::new_zeroed(),
            Some(a) => Self {
                family: AF_INET.to_ne_bytes(),
                port: a.port().to_be_bytes(),
                ip: a.ip().octets(),
                zero: [0u8; 8],
            },
        }
    }

    pub fn to_addr(&self) -> Option<SocketAddrV4> {
        if u16::from_ne_bytes(self.family) != AF_INET {
            return None;
        }
        Some(SocketAddrV4::new(
            Ipv4Addr::from(self.ip),
            u16::from_be_bytes(self.port),
        ))
    }
}

/// Fixed-size request/response record.
///
/// Used for every request to the index, for the Search response, and for
/// the Download request that opens a content stream.
///
/// Wire size: 56 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ControlPdu {
    pub kind: u8,
    pub peer_name: [u8; NAME_LEN],
    pub content_name: [u8; NAME_LEN],
    /// Alignment gap before the 4-byte aligned address. Always zero.
    pub align: [u8; 3],
    /// Meaningful for Register and for the Search response only.
    pub addr: RawSockAddr,
    /// Reserved, must be zero.
    pub padding: [u8; 16],
}

assert_eq_size!(ControlPdu, [u8; 56]);

/// Acknowledgement / error / listing record.
///
/// Wire size: 101 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct SimplePdu {
    pub kind: u8,
    pub text: [u8; TEXT_LEN],
}

assert_eq_size!(SimplePdu, [u8; 101]);

/// Header of one frame in a content stream. The payload follows directly.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Always `Kind::Content`.
    pub kind: u8,
    /// Payload length in bytes, big-endian. Zero ends the stream.
    pub length: [u8; 4],
}

assert_eq_size!(FrameHeader, [u8; 5]);

pub const CONTROL_RECORD_LEN: usize = std::mem::size_of::<ControlPdu>();
pub const SIMPLE_RECORD_LEN: usize = std::mem::size_of::<SimplePdu>();
pub const FRAME_HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

impl FrameHeader {
    pub fn new(length: u32) -> Self {
        Self {
            kind: Kind::Content.into(),
            length: length.to_be_bytes(),
        }
    }

    /// The zero-length frame that terminates a content stream.
    pub fn end_of_stream() -> Self {
        Self::new(0)
    }

    /// Parse exactly `FRAME_HEADER_LEN` bytes and return the payload length.
    pub fn decode(bytes: &[u8]) -> Result<u32, WireError> {
        let header = FrameHeader::read_from(bytes).ok_or(WireError::Length {
            expected: FRAME_HEADER_LEN,
            actual: bytes.len(),
        })?;
        let kind = Kind::try_from(header.kind)?;
        if kind != Kind::Content {
            return Err(WireError::UnexpectedKind(kind));
        }
        Ok(u32::from_be_bytes(header.length))
    }
}

// ── Typed records ─────────────────────────────────────────────────────────────

/// Decoded ControlRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub kind: Kind,
    pub peer_name: String,
    pub content_name: String,
    pub addr: Option<SocketAddrV4>,
}

impl ControlRecord {
    pub fn new(kind: Kind, peer_name: &str, content_name: &str) -> Self {
        Self {
            kind,
            peer_name: bounded(peer_name, NAME_LEN).to_string(),
            content_name: bounded(content_name, NAME_LEN).to_string(),
            addr: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddrV4) -> Self {
        self.addr = Some(addr);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut pdu = ControlPdu::new_zeroed();
        pdu.kind = self.kind.into();
        put_str(&mut pdu.peer_name, &self.peer_name);
        put_str(&mut pdu.content_name, &self.content_name);
        pdu.addr = RawSockAddr::from_addr(self.addr);
        pdu.as_bytes().to_vec()
    }

    /// Decode exactly `CONTROL_RECORD_LEN` bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let pdu = ControlPdu::read_from(bytes).ok_or(WireError::Length {
            expected: CONTROL_RECORD_LEN,
            actual: bytes.len(),
        })?;
        let kind = Kind::try_from(pdu.kind)?;
        Ok(Self {
            kind,
            peer_name: get_name(&pdu.peer_name),
            content_name: get_name(&pdu.content_name),
            addr: pdu.addr.to_addr(),
        })
    }
}

/// Decoded SimpleRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleRecord {
    pub kind: Kind,
    pub text: String,
}

impl SimpleRecord {
    pub fn new(kind: Kind, text: &str) -> Self {
        Self {
            kind,
            text: bounded(text, TEXT_LEN).to_string(),
        }
    }

    pub fn acknowledge(text: &str) -> Self {
        Self::new(Kind::Acknowledge, text)
    }

    pub fn error(text: &str) -> Self {
        Self::new(Kind::Error, text)
    }

    pub fn online(text: &str) -> Self {
        Self::new(Kind::Online, text)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut pdu = SimplePdu::new_zeroed();
        pdu.kind = self.kind.into();
        put_str(&mut pdu.text, &self.text);
        pdu.as_bytes().to_vec()
    }

    /// Decode exactly `SIMPLE_RECORD_LEN` bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let pdu = SimplePdu::read_from(bytes).ok_or(WireError::Length {
            expected: SIMPLE_RECORD_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self {
            kind: Kind::try_from(pdu.kind)?,
            text: get_str(&pdu.text),
        })
    }
}

/// Any datagram the index can send back. The shape is told apart by length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Control(ControlRecord),
    Simple(SimpleRecord),
}

impl Reply {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        match bytes.len() {
            CONTROL_RECORD_LEN => ControlRecord::decode(bytes).map(Reply::Control),
            SIMPLE_RECORD_LEN => SimpleRecord::decode(bytes).map(Reply::Simple),
            actual => Err(WireError::Length {
                expected: SIMPLE_RECORD_LEN,
                actual,
            }),
        }
    }
}

// ── Names ─────────────────────────────────────────────────────────────────────

/// Longest prefix of `value` that fits a `width`-byte field with its NUL,
/// cut on a character boundary.
pub fn bounded(value: &str, width: usize) -> &str {
    let mut end = value.len().min(width.saturating_sub(1));
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// A content or peer name must be non-empty and fit a name field untruncated.
pub fn check_name(value: &str) -> Result<(), WireError> {
    if value.is_empty() {
        return Err(WireError::EmptyName);
    }
    if value.len() > NAME_LEN - 1 {
        return Err(WireError::NameTooLong(value.to_string()));
    }
    Ok(())
}

fn put_str(field: &mut [u8], value: &str) {
    let value = bounded(value, field.len());
    field[..value.len()].copy_from_slice(value.as_bytes());
}

/// A name field holds at most `NAME_LEN - 1` meaningful bytes, NUL or not.
fn get_name(field: &[u8; NAME_LEN]) -> String {
    get_str(&field[..NAME_LEN - 1])
}

fn get_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("record length {actual} does not match expected {expected}")]
    Length { expected: usize, actual: usize },

    #[error("unknown kind byte: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unexpected record kind {0:?}")]
    UnexpectedKind(Kind),

    #[error("name is empty")]
    EmptyName,

    #[error("name {0:?} exceeds {} bytes", NAME_LEN - 1)]
    NameTooLong(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
