//! Outbound packet framing.

use bytes::{BufMut, BytesMut};

use super::varint::{encoded_size, put_varint};

/// Packet id of both the status response and the login disconnect.
pub const STRING_PACKET_ID: i32 = 0x00;

/// Fixed pong sent after every status response: length 9, id 1 and an
/// 8-byte payload. Inbound pings are never parsed, so the payload is a
/// constant rather than an echo.
pub const PING_RESPONSE: [u8; 10] = [0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x32];

/// Empty status request (length 1, id 0).
pub const STATUS_REQUEST: [u8; 2] = [0x01, 0x00];

/// Frame a packet whose body is a single length-prefixed UTF-8 string.
///
/// ```text
/// VarInt(total) VarInt(packet_id) VarInt(string bytes) <string bytes>
/// ```
pub fn encode_string_packet(packet_id: i32, payload: &str) -> BytesMut {
    let bytes = payload.as_bytes();
    let str_len = bytes.len() as i32;
    let total = encoded_size(packet_id) + encoded_size(str_len) + bytes.len();

    let mut out = BytesMut::with_capacity(encoded_size(total as i32) + total);
    put_varint(&mut out, total as i32);
    put_varint(&mut out, packet_id);
    put_varint(&mut out, str_len);
    out.put_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buffer::{CursorBuffer, ReadResult};

    #[test]
    fn test_short_string_packet() {
        let packet = encode_string_packet(0, "hi");
        assert_eq!(&packet[..], &[0x04, 0x00, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_long_string_packet_framing() {
        let payload = "x".repeat(200);
        let packet = encode_string_packet(STRING_PACKET_ID, &payload);

        // 1 (id) + 2 (length 200) + 200
        let mut buf = CursorBuffer::new();
        buf.append(&packet);
        assert_eq!(buf.read_varint(5, false), ReadResult::Complete(203));
        assert_eq!(buf.remaining(), 203);
        assert_eq!(buf.read_varint(5, false), ReadResult::Complete(0));
        assert_eq!(buf.read_string(5, 32767), ReadResult::Complete(payload));
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_multibyte_utf8_counts_bytes() {
        let packet = encode_string_packet(0, "§e");
        // '§' is two bytes in UTF-8.
        assert_eq!(&packet[..3], &[0x05, 0x00, 0x03]);
    }

    #[test]
    fn test_ping_response_shape() {
        assert_eq!(PING_RESPONSE[0] as usize, PING_RESPONSE.len() - 1);
        assert_eq!(PING_RESPONSE[1], 0x01);
    }
}
