/// Error types for serial data link operations
///
/// Protocol faults seen on the wire are recovered locally and surfaced as
/// latched status flags, so these errors mostly describe caller mistakes
/// (bad configuration, out-of-range slots) and codec results.
use std::io;

use thiserror::Error;

/// Result type alias for data link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Data link error enumeration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// I/O error on the underlying byte stream (async driver only)
    #[error("I/O error: {0}")]
    Io(String),

    /// Received checksum does not match the one computed over the frame
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// Slot index outside the table
    #[error("slot index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: u8, capacity: usize },

    /// Frame shorter than header + address + terminator + checksum
    #[error("packet too short: need at least {minimum} bytes, got {received}")]
    PacketTooShort { minimum: usize, received: usize },

    /// Framing bytes missing or payload not a whole number of entries
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Refusing to encode a packet with no entries
    #[error("packet has no entries")]
    EmptyPacket,

    /// Encoded packet would not fit the transmit buffer
    #[error("buffer too small: required {required}, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// Link configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The async driver behind a handle has stopped
    #[error("link driver stopped")]
    Closed,
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
