//! Wire protocol for the server-list exchange.
//!
//! Only the pieces needed to answer a server-list ping are implemented:
//! - `varint`: 7-bit group variable-length integers
//! - `buffer`: accumulating byte buffer with a resettable cursor
//! - `handshake`: the client's opening packet
//! - `packet`: string packets and the fixed pong
//!
//! Encryption, compression and gameplay packets are out of scope.

pub mod buffer;
pub mod handshake;
pub mod packet;
pub mod varint;

pub use buffer::{CursorBuffer, ReadResult};
pub use handshake::{Handshake, HandshakeError, NextState, ParseResult};
pub use packet::{encode_string_packet, PING_RESPONSE, STATUS_REQUEST, STRING_PACKET_ID};
