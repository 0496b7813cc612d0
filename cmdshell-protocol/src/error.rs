//! Protocol error types.

use thiserror::Error;

/// Structural errors raised while encoding or decoding frames.
///
/// These never travel over the wire. A peer that fails to decode a frame
/// answers with [`ResultCode::IncompleteMessage`](crate::ResultCode) instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame too short: {len} bytes (min {min})")]
    TooShort { len: usize, min: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid start marker: {0:02x?}")]
    InvalidStartMarker([u8; 3]),

    #[error("invalid end marker: {0:02x?}")]
    InvalidEndMarker([u8; 3]),

    #[error("length mismatch: header declares {declared} bytes, frame spans {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("corrupt frame dropped (sequence {sequence:?})")]
    CorruptFrame { sequence: Option<u64> },

    #[error("invalid UTF-8 in command line")]
    InvalidUtf8,

    #[error("empty command")]
    EmptyCommand,

    #[error("command or argument contains a space: {0:?}")]
    EmbeddedSpace(String),

    #[error("unknown result code: {0}")]
    UnknownResultCode(u8),

    #[error("unknown result type: {0}")]
    UnknownResultType(u8),

    #[error("payload of {len} bytes does not fit result type {result_type}")]
    PayloadMismatch { result_type: &'static str, len: usize },
}
