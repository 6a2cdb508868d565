//! Wire-level error types.

use thiserror::Error;

/// Result alias for wire encoding and decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding envelopes.
///
/// None of these are transient: a decoding failure means the peer sent bytes
/// this build cannot interpret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed header
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Header magic does not match
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header version is not supported by this build
    #[error("unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    /// Payload exceeds the configured maximum
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared or actual payload size
        size: usize,
        /// Maximum accepted payload size
        max: usize,
    },

    /// Buffer ends before the declared payload does
    #[error("frame truncated: expected {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Declared payload size
        expected: usize,
        /// Payload bytes available
        actual: usize,
    },

    /// Header carries a message kind this build does not know
    #[error("unknown message kind: {0:#06x}")]
    UnknownKind(u16),

    /// Header kind and decoded body disagree
    #[error("message kind mismatch: header says {header:#06x}, body is {body:#06x}")]
    KindMismatch {
        /// Kind declared in the header
        header: u16,
        /// Kind of the decoded body
        body: u16,
    },

    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
