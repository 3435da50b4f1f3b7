//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when decoding receiver messages.
///
/// All of these are local to the message being decoded. A reader loop that
/// hits one drops that message and keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A field read would run past the end of the buffer.
    #[error("read of {width} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfRange {
        /// Offset of the field.
        offset: usize,
        /// Width of the field in bytes.
        width: usize,
        /// Length of the buffer.
        len: usize,
    },

    /// The message does not start with a known header.
    #[error("unknown message header: {0:02X?}")]
    UnknownHeader([u8; 3]),

    /// The message length does not match its kind.
    #[error("{kind} message must be {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Kind named by the header.
        kind: &'static str,
        /// Length required for that kind.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// The flight-state byte does not name a known state.
    #[error("unknown flight state: 0x{0:02X}")]
    UnknownFlightState(u8),
}

impl ProtocolError {
    /// Create an out-of-range error for a read of `width` bytes at `offset`.
    pub fn out_of_range(offset: usize, width: usize, len: usize) -> Self {
        ProtocolError::OutOfRange { offset, width, len }
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
