//! Per-connection state machine.
//!
//! Tracks one inbound connection from accept to close, independent of how
//! bytes are delivered:
//!
//! ```text
//! AwaitingHandshake --handshake--> Responding --close--> Closed
//!        |  \--invalid / io error--> Errored ----close--/
//!        \-----deadline-----------> TimedOut ---close--/
//!
//! Responding may also end in Errored (write failure) or TimedOut (reply
//! deadline).
//! ```
//!
//! At most one response is produced per connection. Once the state leaves
//! `AwaitingHandshake` further data is ignored.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};

use crate::protocol::handshake::{self, Handshake, HandshakeError, ParseResult};
use crate::protocol::CursorBuffer;

/// Initial capacity of the receive buffer; a typical handshake is well below this.
const INITIAL_BUFFER: usize = 512;

/// Why a connection was closed abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The handshake did not arrive before the deadline.
    Timeout,
    /// The peer sent an illegal handshake.
    Protocol(HandshakeError),
    /// Reading from or writing to the socket failed.
    Io(io::ErrorKind, String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Timeout => write!(f, "handshake timeout"),
            CloseReason::Protocol(e) => write!(f, "illegal handshake: {e}"),
            CloseReason::Io(_, msg) => write!(f, "{msg}"),
        }
    }
}

/// Current state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    /// Accumulating bytes until a full handshake decodes.
    AwaitingHandshake,
    /// A response has been committed to.
    Responding,
    /// The handshake deadline passed.
    TimedOut,
    /// Protocol or socket failure.
    Errored(CloseReason),
    /// Outcome has been reported.
    Closed,
}

/// What the driver should do after a chunk of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Keep reading.
    Wait,
    /// Send the response for this handshake, then close.
    Respond(Handshake),
    /// Close without responding.
    Close,
    /// The connection is no longer accepting input.
    Ignore,
}

/// Classification of a finished connection. Exactly one is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Closed because of a timeout, protocol error or socket error.
    Errored(CloseReason),
    /// Peer went away before a response was committed.
    DisconnectedBeforeResponse,
    /// A response was sent.
    Answered,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Errored(reason) => write!(f, "disconnected with error: {reason}"),
            Outcome::DisconnectedBeforeResponse => {
                write!(f, "disconnected before receiving response")
            }
            Outcome::Answered => write!(f, "disconnected successfully"),
        }
    }
}

/// One inbound connection.
#[derive(Debug)]
pub struct Connection {
    state: ConnState,
    buffer: CursorBuffer,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ConnState::AwaitingHandshake,
            buffer: CursorBuffer::with_capacity(INITIAL_BUFFER),
        }
    }

    #[cfg(test)]
    fn state(&self) -> &ConnState {
        &self.state
    }

    /// Feed newly received bytes.
    pub fn on_data(&mut self, chunk: &[u8]) -> Action {
        if self.state != ConnState::AwaitingHandshake {
            return Action::Ignore;
        }

        self.buffer.append(chunk);
        self.buffer.reset_cursor();

        match decode_guarded(&mut self.buffer) {
            ParseResult::Incomplete => Action::Wait,
            ParseResult::Invalid(e) => {
                self.state = ConnState::Errored(CloseReason::Protocol(e));
                Action::Close
            }
            ParseResult::Complete(handshake) => {
                self.state = ConnState::Responding;
                Action::Respond(handshake)
            }
        }
    }

    /// The handshake or reply deadline fired.
    pub fn on_timeout(&mut self) {
        if matches!(self.state, ConnState::AwaitingHandshake | ConnState::Responding) {
            self.state = ConnState::TimedOut;
        }
    }

    /// A read or write failed. The first error wins.
    pub fn on_io_error(&mut self, error: &io::Error) {
        match self.state {
            ConnState::AwaitingHandshake | ConnState::Responding => {
                self.state =
                    ConnState::Errored(CloseReason::Io(error.kind(), error.to_string()));
            }
            ConnState::TimedOut | ConnState::Errored(_) | ConnState::Closed => {}
        }
    }

    /// Close the connection and classify it. Subsequent calls return `None`.
    pub fn close(&mut self) -> Option<Outcome> {
        let outcome = match std::mem::replace(&mut self.state, ConnState::Closed) {
            ConnState::Closed => return None,
            ConnState::TimedOut => Outcome::Errored(CloseReason::Timeout),
            ConnState::Errored(reason) => Outcome::Errored(reason),
            ConnState::Responding => Outcome::Answered,
            ConnState::AwaitingHandshake => Outcome::DisconnectedBeforeResponse,
        };
        Some(outcome)
    }
}

/// Decode, turning a panic inside the decoder into a rejected handshake.
fn decode_guarded(buffer: &mut CursorBuffer) -> ParseResult {
    panic::catch_unwind(AssertUnwindSafe(|| handshake::decode(buffer)))
        .unwrap_or(ParseResult::Invalid(HandshakeError::Internal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NextState;

    fn status_handshake() -> Handshake {
        Handshake {
            protocol_version: 763,
            hostname: "localhost".to_string(),
            port: 25565,
            next_state: NextState::Status,
        }
    }

    #[test]
    fn test_handshake_in_one_chunk() {
        let mut conn = Connection::new();
        let action = conn.on_data(&status_handshake().encode());

        assert_eq!(action, Action::Respond(status_handshake()));
        assert_eq!(conn.state(), &ConnState::Responding);
        assert_eq!(conn.close(), Some(Outcome::Answered));
    }

    #[test]
    fn test_handshake_split_across_chunks() {
        let bytes = status_handshake().encode();
        let mut conn = Connection::new();

        for byte in &bytes[..bytes.len() - 1] {
            assert_eq!(conn.on_data(&[*byte]), Action::Wait);
        }
        assert_eq!(
            conn.on_data(&bytes[bytes.len() - 1..]),
            Action::Respond(status_handshake())
        );
    }

    #[test]
    fn test_data_after_response_ignored() {
        let mut conn = Connection::new();
        conn.on_data(&status_handshake().encode());

        assert_eq!(conn.on_data(&status_handshake().encode()), Action::Ignore);
        assert_eq!(conn.on_data(&[0xff, 0xff, 0xff]), Action::Ignore);
        assert_eq!(conn.close(), Some(Outcome::Answered));
    }

    #[test]
    fn test_invalid_handshake_closes() {
        let mut conn = Connection::new();
        assert_eq!(conn.on_data(&[0x05, 0x07, 0x00, 0x00, 0x00, 0x00]), Action::Close);
        assert_eq!(conn.on_data(&status_handshake().encode()), Action::Ignore);
        assert_eq!(
            conn.close(),
            Some(Outcome::Errored(CloseReason::Protocol(
                HandshakeError::UnexpectedPacketId(Some(7))
            )))
        );
    }

    #[test]
    fn test_partial_varint_then_disconnect() {
        let mut conn = Connection::new();
        assert_eq!(conn.on_data(&[0x80]), Action::Wait);
        assert_eq!(conn.close(), Some(Outcome::DisconnectedBeforeResponse));
    }

    #[test]
    fn test_timeout() {
        let mut conn = Connection::new();
        conn.on_data(&[0x10, 0x00]);
        conn.on_timeout();

        assert_eq!(conn.on_data(&[0x01]), Action::Ignore);
        assert_eq!(conn.close(), Some(Outcome::Errored(CloseReason::Timeout)));
    }

    #[test]
    fn test_timeout_while_responding() {
        let mut conn = Connection::new();
        conn.on_data(&status_handshake().encode());
        conn.on_timeout();
        assert_eq!(conn.state(), &ConnState::TimedOut);
        assert_eq!(conn.close(), Some(Outcome::Errored(CloseReason::Timeout)));
    }

    #[test]
    fn test_timeout_after_error_keeps_error() {
        let mut conn = Connection::new();
        conn.on_data(&[0x00]);
        conn.on_timeout();
        assert!(matches!(
            conn.close(),
            Some(Outcome::Errored(CloseReason::Protocol(_)))
        ));
    }

    #[test]
    fn test_write_error_after_answer() {
        let mut conn = Connection::new();
        conn.on_data(&status_handshake().encode());
        conn.on_io_error(&io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));

        match conn.close() {
            Some(Outcome::Errored(CloseReason::Io(kind, _))) => {
                assert_eq!(kind, io::ErrorKind::BrokenPipe)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_first_error_wins() {
        let mut conn = Connection::new();
        conn.on_data(&[0x00]);
        conn.on_io_error(&io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(
            conn.close(),
            Some(Outcome::Errored(CloseReason::Protocol(HandshakeError::BadLength(Some(0)))))
        ));
    }

    #[test]
    fn test_close_reports_once() {
        let mut conn = Connection::new();
        assert_eq!(conn.close(), Some(Outcome::DisconnectedBeforeResponse));
        assert_eq!(conn.close(), None);
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            Outcome::DisconnectedBeforeResponse.to_string(),
            "disconnected before receiving response"
        );
        assert_eq!(Outcome::Answered.to_string(), "disconnected successfully");
        assert_eq!(
            Outcome::Errored(CloseReason::Timeout).to_string(),
            "disconnected with error: handshake timeout"
        );
    }
}
