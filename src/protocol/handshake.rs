//! Handshake packet decoding and encoding.
//!
//! The handshake is the first packet a client sends:
//!
//! ```text
//! VarInt  packet length   (≤ 2 bytes here)
//! VarInt  packet id       (0x00)
//! VarInt  protocol version
//! String  server address  (≤ 255 bytes)
//! u16     server port     (big-endian)
//! VarInt  next state      (1 = status, 2 = login)
//! ```

use bytes::{BufMut, BytesMut};
use std::fmt;

use super::buffer::{CursorBuffer, ReadResult};
use super::varint::{encoded_size, put_varint};

/// Packet id of the handshake.
pub const HANDSHAKE_PACKET_ID: i32 = 0x00;

/// Largest accepted declared packet length.
pub const MAX_HANDSHAKE_LENGTH: i32 = 32768;

/// Highest protocol version accepted from a client. Generous on purpose so
/// that newer and modded clients still get an answer.
pub const MAX_PROTOCOL_VERSION: i32 = 2000;

/// Longest accepted server address, in bytes.
pub const MAX_HOSTNAME_BYTES: usize = 255;

const LENGTH_PREFIX_BYTES: usize = 2;
const PACKET_ID_BYTES: usize = 1;
const PROTOCOL_VERSION_BYTES: usize = 4;
const HOSTNAME_PREFIX_BYTES: usize = 2;
const NEXT_STATE_BYTES: usize = 1;

/// State the client wants to switch to after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
}

impl NextState {
    pub fn id(self) -> i32 {
        match self {
            NextState::Status => 1,
            NextState::Login => 2,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(NextState::Status),
            2 => Some(NextState::Login),
            _ => None,
        }
    }
}

/// A fully validated handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub hostname: String,
    pub port: u16,
    pub next_state: NextState,
}

/// Why a handshake was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Length prefix is malformed or outside `[1, MAX_HANDSHAKE_LENGTH]`.
    BadLength(Option<i32>),
    /// Packet id is not the handshake id.
    UnexpectedPacketId(Option<i32>),
    /// Protocol version is malformed or out of range.
    BadProtocolVersion(Option<i32>),
    /// Server address is malformed, too long or truncated.
    BadHostname,
    /// Port field missing from the frame.
    MissingPort,
    /// Next state is neither status nor login.
    BadNextState(Option<i32>),
    /// Fields run past the declared packet length.
    FrameOverrun { declared: usize, consumed: usize },
    /// The decoder itself failed.
    Internal,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(v: &Option<i32>) -> String {
            v.map_or_else(|| "malformed".to_string(), |v| v.to_string())
        }

        match self {
            HandshakeError::BadLength(v) => write!(f, "illegal packet length: {}", show(v)),
            HandshakeError::UnexpectedPacketId(v) => {
                write!(f, "unexpected packet id: {}", show(v))
            }
            HandshakeError::BadProtocolVersion(v) => {
                write!(f, "invalid protocol version: {}", show(v))
            }
            HandshakeError::BadHostname => write!(f, "invalid server address"),
            HandshakeError::MissingPort => write!(f, "missing server port"),
            HandshakeError::BadNextState(v) => write!(f, "unexpected next state: {}", show(v)),
            HandshakeError::FrameOverrun { declared, consumed } => write!(
                f,
                "fields overrun packet length ({consumed} of {declared} bytes)"
            ),
            HandshakeError::Internal => write!(f, "internal decoder failure"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Result of attempting to decode a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete, valid handshake.
    Complete(Handshake),
    /// The frame has not fully arrived; retry from offset 0 after more data.
    Incomplete,
    /// The peer sent something that will never become a valid handshake.
    Invalid(HandshakeError),
}

fn value(result: ReadResult<i32>) -> Option<i32> {
    match result {
        ReadResult::Complete(v) => Some(v),
        _ => None,
    }
}

/// Decode a handshake from the start of the buffer.
///
/// The caller resets the cursor before each attempt. On `Incomplete` the
/// cursor is rewound to 0.
pub fn decode(buf: &mut CursorBuffer) -> ParseResult {
    if buf.remaining() == 0 {
        return ParseResult::Incomplete;
    }

    let declared = match buf.read_varint(LENGTH_PREFIX_BYTES, true) {
        ReadResult::Complete(len) if (1..=MAX_HANDSHAKE_LENGTH).contains(&len) => len as usize,
        ReadResult::Complete(len) => {
            return ParseResult::Invalid(HandshakeError::BadLength(Some(len)))
        }
        ReadResult::Incomplete => return ParseResult::Incomplete,
        ReadResult::Invalid => return ParseResult::Invalid(HandshakeError::BadLength(None)),
    };

    if buf.remaining() < declared {
        buf.reset_cursor();
        return ParseResult::Incomplete;
    }
    let frame_start = buf.position();

    let packet_id = value(buf.read_varint(PACKET_ID_BYTES, false));
    if packet_id != Some(HANDSHAKE_PACKET_ID) {
        return ParseResult::Invalid(HandshakeError::UnexpectedPacketId(packet_id));
    }

    let protocol_version = match value(buf.read_varint(PROTOCOL_VERSION_BYTES, false)) {
        Some(v) if (0..=MAX_PROTOCOL_VERSION).contains(&v) => v,
        other => return ParseResult::Invalid(HandshakeError::BadProtocolVersion(other)),
    };

    let mut hostname = match buf.read_string(HOSTNAME_PREFIX_BYTES, MAX_HOSTNAME_BYTES) {
        ReadResult::Complete(s) => s,
        _ => return ParseResult::Invalid(HandshakeError::BadHostname),
    };

    let port = match buf.read_u16() {
        ReadResult::Complete(port) => port,
        _ => return ParseResult::Invalid(HandshakeError::MissingPort),
    };

    let state_id = value(buf.read_varint(NEXT_STATE_BYTES, false));
    let next_state = match state_id.and_then(NextState::from_id) {
        Some(state) => state,
        None => return ParseResult::Invalid(HandshakeError::BadNextState(state_id)),
    };

    let consumed = buf.position() - frame_start;
    if consumed > declared {
        return ParseResult::Invalid(HandshakeError::FrameOverrun { declared, consumed });
    }

    // Legacy clients pad the address with NUL-separated extras.
    if let Some(nul) = hostname.find('\0') {
        hostname.truncate(nul);
    }

    ParseResult::Complete(Handshake {
        protocol_version,
        hostname,
        port,
        next_state,
    })
}

impl Handshake {
    /// Encode this handshake as a complete, length-prefixed packet.
    pub fn encode(&self) -> BytesMut {
        let host = self.hostname.as_bytes();
        let host_len = host.len() as i32;
        let body_len = encoded_size(HANDSHAKE_PACKET_ID)
            + encoded_size(self.protocol_version)
            + encoded_size(host_len)
            + host.len()
            + 2
            + encoded_size(self.next_state.id());

        let mut out = BytesMut::with_capacity(encoded_size(body_len as i32) + body_len);
        put_varint(&mut out, body_len as i32);
        put_varint(&mut out, HANDSHAKE_PACKET_ID);
        put_varint(&mut out, self.protocol_version);
        put_varint(&mut out, host_len);
        out.put_slice(host);
        out.put_u16(self.port);
        put_varint(&mut out, self.next_state.id());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCALHOST_STATUS: [u8; 17] = [
        0x10, 0x00, 0xfb, 0x05, 0x09, b'l', b'o', b'c', b'a', b'l', b'h', b'o', b's', b't', 0x63,
        0xdd, 0x01,
    ];

    fn localhost_status() -> Handshake {
        Handshake {
            protocol_version: 763,
            hostname: "localhost".to_string(),
            port: 25565,
            next_state: NextState::Status,
        }
    }

    fn buffer_of(bytes: &[u8]) -> CursorBuffer {
        let mut buf = CursorBuffer::new();
        buf.append(bytes);
        buf
    }

    #[test]
    fn test_encode_known_bytes() {
        assert_eq!(&localhost_status().encode()[..], &LOCALHOST_STATUS[..]);
    }

    #[test]
    fn test_decode_known_bytes() {
        let mut buf = buffer_of(&LOCALHOST_STATUS);
        assert_eq!(decode(&mut buf), ParseResult::Complete(localhost_status()));
    }

    #[test]
    fn test_empty_is_incomplete() {
        let mut buf = CursorBuffer::new();
        assert_eq!(decode(&mut buf), ParseResult::Incomplete);
    }

    #[test]
    fn test_every_prefix_is_incomplete() {
        for cut in 1..LOCALHOST_STATUS.len() {
            let mut buf = buffer_of(&LOCALHOST_STATUS[..cut]);
            assert_eq!(decode(&mut buf), ParseResult::Incomplete, "cut at {cut}");
            assert_eq!(buf.position(), 0, "cursor moved at cut {cut}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buf = CursorBuffer::new();
        let mut result = ParseResult::Incomplete;
        for byte in LOCALHOST_STATUS {
            buf.append(&[byte]);
            buf.reset_cursor();
            result = decode(&mut buf);
        }
        assert_eq!(result, ParseResult::Complete(localhost_status()));
    }

    #[test]
    fn test_partial_length_prefix() {
        let mut buf = buffer_of(&[0x80]);
        assert_eq!(decode(&mut buf), ParseResult::Incomplete);
    }

    #[test]
    fn test_length_prefix_too_long() {
        let mut buf = buffer_of(&[0x80, 0x80, 0x01]);
        assert_eq!(
            decode(&mut buf),
            ParseResult::Invalid(HandshakeError::BadLength(None))
        );
    }

    #[test]
    fn test_zero_length() {
        let mut buf = buffer_of(&[0x00, 0x00]);
        assert_eq!(
            decode(&mut buf),
            ParseResult::Invalid(HandshakeError::BadLength(Some(0)))
        );
    }

    #[test]
    fn test_wrong_packet_id() {
        let mut bytes = LOCALHOST_STATUS;
        bytes[1] = 0x01;
        let mut buf = buffer_of(&bytes);
        assert_eq!(
            decode(&mut buf),
            ParseResult::Invalid(HandshakeError::UnexpectedPacketId(Some(1)))
        );
    }

    #[test]
    fn test_protocol_version_out_of_range() {
        let mut handshake = localhost_status();
        handshake.protocol_version = 2001;
        let mut buf = buffer_of(&handshake.encode());
        assert_eq!(
            decode(&mut buf),
            ParseResult::Invalid(HandshakeError::BadProtocolVersion(Some(2001)))
        );

        handshake.protocol_version = 2000;
        let mut buf = buffer_of(&handshake.encode());
        assert!(matches!(decode(&mut buf), ParseResult::Complete(_)));
    }

    #[test]
    fn test_login_state() {
        let mut handshake = localhost_status();
        handshake.next_state = NextState::Login;
        let mut buf = buffer_of(&handshake.encode());
        assert_eq!(decode(&mut buf), ParseResult::Complete(handshake));
    }

    #[test]
    fn test_bad_next_state() {
        let mut bytes = LOCALHOST_STATUS;
        bytes[16] = 0x03;
        let mut buf = buffer_of(&bytes);
        assert_eq!(
            decode(&mut buf),
            ParseResult::Invalid(HandshakeError::BadNextState(Some(3)))
        );
    }

    #[test]
    fn test_hostname_nul_padding_trimmed() {
        let mut handshake = localhost_status();
        handshake.hostname = "play.example.net\0FML\0".to_string();
        let mut buf = buffer_of(&handshake.encode());
        match decode(&mut buf) {
            ParseResult::Complete(decoded) => assert_eq!(decoded.hostname, "play.example.net"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_hostname_too_long() {
        let mut handshake = localhost_status();
        handshake.hostname = "a".repeat(256);
        let mut buf = buffer_of(&handshake.encode());
        assert_eq!(
            decode(&mut buf),
            ParseResult::Invalid(HandshakeError::BadHostname)
        );
    }

    #[test]
    fn test_hostname_length_past_frame() {
        // Declared frame of 5 bytes whose string claims 9 bytes.
        let mut buf = buffer_of(&[0x05, 0x00, 0x01, 0x09, b'a', b'b']);
        assert_eq!(
            decode(&mut buf),
            ParseResult::Invalid(HandshakeError::BadHostname)
        );
    }

    #[test]
    fn test_fields_overrun_frame() {
        // Frame declares 15 bytes but the fields need 16; the extra byte is
        // already in the buffer.
        let mut bytes = LOCALHOST_STATUS;
        bytes[0] = 0x0f;
        let mut buf = buffer_of(&bytes);
        assert_eq!(
            decode(&mut buf),
            ParseResult::Invalid(HandshakeError::FrameOverrun {
                declared: 15,
                consumed: 16
            })
        );
    }

    #[test]
    fn test_trailing_bytes_after_frame() {
        let mut bytes = LOCALHOST_STATUS.to_vec();
        bytes.extend_from_slice(&[0x01, 0x00]);
        let mut buf = buffer_of(&bytes);
        assert_eq!(decode(&mut buf), ParseResult::Complete(localhost_status()));
    }
}
