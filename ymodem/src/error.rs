//! Error types for the YMODEM protocol core.

use std::io;
use thiserror::Error;

/// Result type for ymodem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fixed numeric error codes, kept for wire-compatibility with callers that
/// check the kind of an [`Error`] rather than matching on its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ErrorKind {
    /// Success (never constructed as an `Error`; reserved for callers that
    /// map `Result<T>` onto this scale).
    None = 0,
    /// Handshake or packet-wait expired.
    Timeout = -1,
    /// Unexpected header byte, or invalid argument to an API.
    WrongCode = -2,
    /// Sequence / complement mismatch, or sustained out-of-sequence packets.
    WrongSequence = -3,
    /// CRC-16 mismatch.
    WrongCrc = -4,
    /// Buffer too small, or a payload length invariant was broken.
    WrongDataSize = -5,
    /// The peer sent CAN.
    Cancelled = -6,
    /// Expected ACK or C not received within the retry budget.
    AckError = -7,
    /// A file callback failed or returned short.
    FileError = -8,
    /// Reserved for ABI compatibility; never emitted by this implementation
    /// since it performs no dynamic allocation in the protocol core.
    MemError = -9,
}

/// Error type for ymodem operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from a transport or file adapter.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Handshake or packet-wait expired.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unexpected header byte, or invalid argument to an API.
    #[error("wrong code: {0}")]
    WrongCode(String),

    /// Sequence / complement mismatch, or sustained out-of-sequence packets.
    #[error("wrong sequence: {0}")]
    WrongSequence(String),

    /// CRC-16 mismatch.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    WrongCrc {
        /// Expected CRC value.
        expected: u16,
        /// Actual CRC value.
        actual: u16,
    },

    /// Buffer too small, or a payload length invariant was broken.
    #[error("wrong data size: {0}")]
    WrongDataSize(String),

    /// The peer sent CAN.
    #[error("transfer cancelled by peer")]
    Cancelled,

    /// Expected ACK or C not received within the retry budget.
    #[error("ack error: {0}")]
    AckError(String),

    /// A file callback failed or returned short.
    #[error("file error: {0}")]
    FileError(String),
}

impl Error {
    /// The fixed numeric kind of this error, for callers that need the
    /// wire-compatible scale from the protocol specification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::FileError,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::WrongCode(_) => ErrorKind::WrongCode,
            Self::WrongSequence(_) => ErrorKind::WrongSequence,
            Self::WrongCrc { .. } => ErrorKind::WrongCrc,
            Self::WrongDataSize(_) => ErrorKind::WrongDataSize,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AckError(_) => ErrorKind::AckError,
            Self::FileError(_) => ErrorKind::FileError,
        }
    }
}
