//! # cmdshell-protocol
//!
//! Wire protocol for the cmdshell serial command link.
//!
//! This crate provides:
//! - Binary Message (command) and Result (response) encoding
//! - Typed result payloads and stable result codes
//! - Marker-based frame scanning that resynchronizes on noisy byte streams
//! - An accumulating frame decoder for stream transports

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod response;

pub use codec::FrameDecoder;
pub use error::ProtocolError;
pub use frame::{scan, FrameKind, ScanOutcome, EOM, SOM};
pub use message::Message;
pub use response::{ResultCode, ResultData, ResultType, Response};

/// Bytes preceding the payload: SOM + length + sequence + callback id.
pub const HEADER_SIZE: usize = 15;

/// Bytes of header needed to recover a frame's sequence number.
pub const SEQUENCE_HEADER_SIZE: usize = 13;

/// Smallest possible encoded Message (no command text).
pub const MIN_MESSAGE_SIZE: usize = HEADER_SIZE + 3;

/// Smallest possible encoded Result (no data payload).
pub const MIN_RESPONSE_SIZE: usize = HEADER_SIZE + 2 + 3;

/// Largest frame expressible by the 16-bit length field.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;
