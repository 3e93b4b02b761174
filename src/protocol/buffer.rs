//! Growable byte buffer with a resettable read cursor.
//!
//! Network data arrives in arbitrary chunks. Every chunk is appended and the
//! decoder re-reads the accumulated bytes from the start, so no partial
//! field state has to survive between attempts.

use bytes::BytesMut;

use super::varint::{self, VarIntResult};

/// Outcome of a single read from a [`CursorBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult<T> {
    /// Value read; the cursor moved past it.
    Complete(T),
    /// Not enough bytes yet; the cursor did not move.
    Incomplete,
    /// The bytes can never form a valid value; the cursor did not move.
    Invalid,
}

/// Append-only byte buffer with an explicit read offset.
#[derive(Debug, Default)]
pub struct CursorBuffer {
    data: BytesMut,
    offset: usize,
}

impl CursorBuffer {
    /// Create an empty buffer.
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            offset: 0,
        }
    }

    /// Append newly received bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Rewind the cursor to the first byte.
    pub fn reset_cursor(&mut self) {
        self.offset = 0;
    }

    /// Total bytes held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Bytes between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Bytes between the cursor and the end of the buffer, without consuming them.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    /// Read one unsigned byte.
    #[cfg(test)]
    pub fn read_u8(&mut self) -> ReadResult<u8> {
        match self.unread().first() {
            Some(&b) => {
                self.offset += 1;
                ReadResult::Complete(b)
            }
            None => ReadResult::Incomplete,
        }
    }

    /// Read a big-endian unsigned short.
    pub fn read_u16(&mut self) -> ReadResult<u16> {
        match self.unread() {
            [hi, lo, ..] => {
                let value = u16::from_be_bytes([*hi, *lo]);
                self.offset += 2;
                ReadResult::Complete(value)
            }
            _ => ReadResult::Incomplete,
        }
    }

    /// Read a VarInt occupying at most `max_bytes`.
    ///
    /// Running out of bytes yields `Incomplete` when `allow_incomplete` is set
    /// and `Invalid` otherwise. Only the outermost length field of a packet
    /// may legitimately be cut short by TCP segmentation; inner fields are
    /// read after the whole frame is known to be present.
    pub fn read_varint(&mut self, max_bytes: usize, allow_incomplete: bool) -> ReadResult<i32> {
        match varint::decode(self.unread(), max_bytes) {
            VarIntResult::Complete { value, len } => {
                self.offset += len;
                ReadResult::Complete(value)
            }
            VarIntResult::Incomplete if allow_incomplete => ReadResult::Incomplete,
            VarIntResult::Incomplete | VarIntResult::TooLong => ReadResult::Invalid,
        }
    }

    /// Read a VarInt-length-prefixed UTF-8 string.
    ///
    /// The prefix may occupy at most `max_prefix_bytes` and declare at most
    /// `max_utf8_bytes`. A declared length larger than what remains is
    /// treated as garbage, not as a reason to wait. Invalid UTF-8 is replaced
    /// rather than rejected.
    pub fn read_string(&mut self, max_prefix_bytes: usize, max_utf8_bytes: usize) -> ReadResult<String> {
        let start = self.offset;

        let len = match self.read_varint(max_prefix_bytes, false) {
            ReadResult::Complete(len) => len,
            _ => return ReadResult::Invalid,
        };

        let len = match usize::try_from(len) {
            Ok(len) if len <= max_utf8_bytes && len <= self.remaining() => len,
            _ => {
                self.offset = start;
                return ReadResult::Invalid;
            }
        };

        let value = String::from_utf8_lossy(&self.unread()[..len]).into_owned();
        self.offset += len;
        ReadResult::Complete(value)
    }
}
