//! VarInt encoding.
//!
//! A VarInt stores a 32-bit integer in 1-5 bytes, seven bits per byte,
//! least significant group first. The high bit of each byte is set when
//! another byte follows.

use bytes::BufMut;

/// Largest number of bytes a 32-bit VarInt can occupy.
pub const MAX_VARINT_BYTES: usize = 5;

const SEGMENT_BITS: u8 = 0x7f;
const CONTINUE_BIT: u8 = 0x80;

/// Result of decoding a VarInt from a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntResult {
    /// Decoded value and the number of bytes it occupied.
    Complete { value: i32, len: usize },
    /// Input ended before the terminating byte.
    Incomplete,
    /// Continuation run reached the byte limit without terminating.
    TooLong,
}

/// Decode a VarInt from the start of `input`, reading at most `max_bytes`.
pub fn decode(input: &[u8], max_bytes: usize) -> VarIntResult {
    let max_bytes = max_bytes.min(MAX_VARINT_BYTES);
    let mut value: u32 = 0;

    for (i, &byte) in input.iter().enumerate() {
        value |= u32::from(byte & SEGMENT_BITS) << (7 * i);

        if byte & CONTINUE_BIT == 0 {
            return VarIntResult::Complete {
                value: value as i32,
                len: i + 1,
            };
        }

        if i + 1 >= max_bytes {
            return VarIntResult::TooLong;
        }
    }

    VarIntResult::Incomplete
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_size(value: i32) -> usize {
    let value = value as u32;
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

/// Append the encoding of `value` to `buf`.
pub fn put_varint<B: BufMut>(buf: &mut B, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !u32::from(SEGMENT_BITS) == 0 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8((value as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        value >>= 7;
    }
}

/// Encode `value` into a fresh byte vector.
#[cfg(test)]
pub fn encode(value: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_size(value));
    put_varint(&mut out, value);
    out
}
