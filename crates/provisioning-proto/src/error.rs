//! Wire codec error types.

use thiserror::Error;

/// Errors produced while decoding a provisioning frame.
///
/// Every variant here is non-fatal to the server: a frame that fails
/// to decode is logged and dropped by the caller (see the Session
/// Router), never propagated as a process-level failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The frame is shorter than the 6-byte common header.
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Length of the raw buffer.
        len: usize,
        /// Minimum length required for this frame shape.
        min: usize,
    },

    /// The first byte did not match a known message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// A length-bounded field did not meet its required length.
    #[error("invalid length for {field}: expected {expected}, got {actual}")]
    InvalidLength {
        /// Name of the offending field.
        field: &'static str,
        /// Description of the expected length (e.g. "16" or "0 or 5").
        expected: &'static str,
        /// Actual length observed.
        actual: usize,
    },

    /// A field restricted to a small enum of values held something else.
    #[error("invalid value for {field}: {value}")]
    InvalidEnumValue {
        /// Name of the offending field.
        field: &'static str,
        /// The raw value observed.
        value: u8,
    },
}
