//! Accumulating frame decoder for stream transports.

use crate::error::ProtocolError;
use crate::frame::{recover_sequence, scan, FrameKind, ScanOutcome};
use crate::message::Message;
use crate::response::Response;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, Bytes, BytesMut};

/// One unit pulled out of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Bytes of a complete frame with verified markers and length.
    Frame(Bytes),
    /// A frame that had to be dropped.
    Corrupt { sequence: Option<u64> },
}

/// Bounded byte buffer that yields frames as they complete.
///
/// Unconsumed bytes always begin at index zero: noise in front of a start
/// marker is dropped on each scan and bytes after a consumed frame move to
/// the front.
pub struct FrameDecoder {
    buffer: BytesMut,
    kind: FrameKind,
    capacity: usize,
}

impl FrameDecoder {
    pub fn new(kind: FrameKind, capacity: usize) -> Self {
        let capacity = capacity.clamp(kind.min_size(), MAX_FRAME_SIZE);
        Self {
            buffer: BytesMut::with_capacity(capacity),
            kind,
            capacity,
        }
    }

    /// Decoder for Results arriving at the host.
    pub fn responses() -> Self {
        Self::new(FrameKind::Response, MAX_FRAME_SIZE)
    }

    /// Appends as much of `data` as fits and returns the number of bytes taken.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        self.buffer.extend_from_slice(&data[..take]);
        take
    }

    /// Pulls the next frame out of the buffer, if one is complete.
    pub fn next_frame(&mut self) -> Option<Decoded> {
        loop {
            match scan(&self.buffer, self.kind, self.capacity) {
                ScanOutcome::Noise { discard } => {
                    self.consume(discard);
                    return None;
                }
                ScanOutcome::NeedHeader { start } | ScanOutcome::NeedBody { start, .. } => {
                    self.consume(start);
                    return None;
                }
                ScanOutcome::Frame { start, len } => {
                    self.consume(start);
                    let frame = self.buffer.split_to(len).freeze();
                    self.compact();
                    return Some(Decoded::Frame(frame));
                }
                ScanOutcome::Corrupt {
                    start,
                    end,
                    sequence,
                } => {
                    self.consume(end);
                    // A bare marker skip with no recoverable header is silent.
                    if sequence.is_none() && end - start < self.kind.min_size() {
                        continue;
                    }
                    return Some(Decoded::Corrupt { sequence });
                }
            }
        }
    }

    /// Abandons a partial frame after the peer went idle.
    ///
    /// Returns the recovered sequence when enough of the header arrived.
    pub fn give_up(&mut self) -> Option<Decoded> {
        if self.buffer.is_empty() {
            return None;
        }
        let outcome = scan(&self.buffer, self.kind, self.capacity);
        let sequence = if outcome.is_partial() {
            recover_sequence(&self.buffer)
        } else {
            None
        };
        self.clear();
        Some(Decoded::Corrupt { sequence })
    }

    /// Decodes the next complete Result.
    ///
    /// A dropped frame yields `Err`; the decoder stays usable.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        match self.next_frame() {
            Some(Decoded::Frame(frame)) => Response::decode(&frame).map(Some),
            Some(Decoded::Corrupt { sequence }) => Err(ProtocolError::CorruptFrame { sequence }),
            None => Ok(None),
        }
    }

    /// Decodes the next complete Message.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.next_frame() {
            Some(Decoded::Frame(frame)) => Message::decode(&frame).map(Some),
            Some(Decoded::Corrupt { sequence }) => Err(ProtocolError::CorruptFrame { sequence }),
            None => Ok(None),
        }
    }

    /// Returns whether the buffer holds the beginning of a frame.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() && scan(&self.buffer, self.kind, self.capacity).is_partial()
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the free space left in the buffer.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn consume(&mut self, n: usize) {
        self.buffer.advance(n);
        self.compact();
    }

    fn compact(&mut self) {
        if self.buffer.is_empty() {
            self.buffer.clear();
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::responses()
    }
}
