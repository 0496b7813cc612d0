//! Frame envelope and stream scanning.
//!
//! Every frame, command or result, shares the same envelope:
//!
//! ```text
//! +---------+--------+----------+-------------+----------------+---------+
//! |   SOM   | length | sequence | callback id |      body      |   EOM   |
//! | 3 bytes |2 bytes | 8 bytes  |   2 bytes   | length - 18    | 3 bytes |
//! +---------+--------+----------+-------------+----------------+---------+
//! ```
//!
//! `length` counts the whole frame including both markers. The scanner does
//! not assume alignment: it searches forward byte by byte for SOM so that
//! line-turnaround noise in front of a frame is skipped.

use crate::error::ProtocolError;
use crate::{MIN_MESSAGE_SIZE, MIN_RESPONSE_SIZE, SEQUENCE_HEADER_SIZE};

/// Start-of-message marker.
pub const SOM: [u8; 3] = [0xFE, 0xFF, 0xFE];

/// End-of-message marker.
pub const EOM: [u8; 3] = [0xFF, 0x01, 0xFF];

/// Offset of the 16-bit length field.
const LENGTH_OFFSET: usize = 3;

/// Offset of the 64-bit sequence field.
const SEQUENCE_OFFSET: usize = 5;

/// Offset of the 16-bit callback id field.
const CALLBACK_OFFSET: usize = 13;

/// Which frame layout a scanner is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Host to device command.
    Message,
    /// Device to host result.
    Response,
}

impl FrameKind {
    /// Minimum encoded size of this kind of frame.
    pub fn min_size(self) -> usize {
        match self {
            FrameKind::Message => MIN_MESSAGE_SIZE,
            FrameKind::Response => MIN_RESPONSE_SIZE,
        }
    }
}

/// Classification of an accumulating receive buffer.
///
/// All positions are indices into the scanned slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No start marker. The first `discard` bytes are noise; anything after
    /// them is a partial SOM that may complete on the next read.
    Noise { discard: usize },
    /// Start marker found but the length field is not complete yet.
    NeedHeader { start: usize },
    /// Length known, fewer than `declared` bytes buffered from `start`.
    NeedBody { start: usize, declared: usize },
    /// A complete frame with a verified end marker.
    Frame { start: usize, len: usize },
    /// A frame that cannot be decoded. Bytes up to `end` must be dropped.
    /// `sequence` is recovered when enough header bytes were present.
    Corrupt {
        start: usize,
        end: usize,
        sequence: Option<u64>,
    },
}

impl ScanOutcome {
    /// Returns whether the buffer holds the beginning of a frame that needs
    /// more bytes.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            ScanOutcome::NeedHeader { .. } | ScanOutcome::NeedBody { .. }
        )
    }
}

/// Scans `buf` for the first frame of `kind`.
///
/// `max_len` bounds the declared length a frame may have; anything larger
/// could never fit the receiver's scratch buffer and is treated as corrupt.
pub fn scan(buf: &[u8], kind: FrameKind, max_len: usize) -> ScanOutcome {
    let start = match find_marker(buf, &SOM, 0) {
        Some(start) => start,
        None => {
            return ScanOutcome::Noise {
                discard: buf.len() - partial_marker_suffix(buf),
            }
        }
    };

    let candidate = &buf[start..];
    if candidate.len() < LENGTH_OFFSET + 2 {
        return ScanOutcome::NeedHeader { start };
    }

    let declared = declared_length(candidate);
    if declared < kind.min_size() || declared > max_len {
        // The length field is garbage; skip this marker and rescan.
        return ScanOutcome::Corrupt {
            start,
            end: start + SOM.len(),
            sequence: recover_sequence(candidate),
        };
    }

    if candidate.len() < declared {
        return ScanOutcome::NeedBody { start, declared };
    }

    if candidate[declared - EOM.len()..declared] != EOM {
        return ScanOutcome::Corrupt {
            start,
            end: start + declared,
            sequence: recover_sequence(candidate),
        };
    }

    ScanOutcome::Frame {
        start,
        len: declared,
    }
}

/// Finds `marker` in `buf` at or after `from`.
pub fn find_marker(buf: &[u8], marker: &[u8; 3], from: usize) -> Option<usize> {
    if buf.len() < from + marker.len() {
        return None;
    }
    buf[from..]
        .windows(marker.len())
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

/// Recovers the sequence number from a frame prefix, if present.
pub fn recover_sequence(frame: &[u8]) -> Option<u64> {
    if frame.len() < SEQUENCE_HEADER_SIZE || frame[..SOM.len()] != SOM {
        return None;
    }
    Some(read_u64(frame, SEQUENCE_OFFSET))
}

/// Length of the longest buffer suffix that is a proper prefix of SOM.
fn partial_marker_suffix(buf: &[u8]) -> usize {
    (1..SOM.len())
        .rev()
        .find(|&n| buf.len() >= n && buf[buf.len() - n..] == SOM[..n])
        .unwrap_or(0)
}

fn declared_length(frame: &[u8]) -> usize {
    read_u16(frame, LENGTH_OFFSET) as usize
}

/// Reads a big-endian `u16` at `at`.
pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

/// Reads a big-endian `u64` at `at`.
pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(raw)
}

/// Header fields common to both frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Envelope {
    pub sequence: u64,
    pub callback_id: u16,
}

/// Validates markers and the length field of a complete candidate frame.
pub(crate) fn open_envelope(bytes: &[u8], kind: FrameKind) -> Result<Envelope, ProtocolError> {
    let min = kind.min_size();
    if bytes.len() < min {
        return Err(ProtocolError::TooShort {
            len: bytes.len(),
            min,
        });
    }

    let head = [bytes[0], bytes[1], bytes[2]];
    if head != SOM {
        return Err(ProtocolError::InvalidStartMarker(head));
    }

    let n = bytes.len();
    let tail = [bytes[n - 3], bytes[n - 2], bytes[n - 1]];
    if tail != EOM {
        return Err(ProtocolError::InvalidEndMarker(tail));
    }

    let declared = declared_length(bytes);
    if declared != n {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: n,
        });
    }

    Ok(Envelope {
        sequence: read_u64(bytes, SEQUENCE_OFFSET),
        callback_id: read_u16(bytes, CALLBACK_OFFSET),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::MAX_FRAME_SIZE;

    fn ping(sequence: u64) -> Vec<u8> {
        Message::new(sequence, 0, "ping").encode().unwrap().to_vec()
    }

    #[test]
    fn test_scan_complete_frame() {
        let frame = ping(1);
        let outcome = scan(&frame, FrameKind::Message, MAX_FRAME_SIZE);
        assert_eq!(
            outcome,
            ScanOutcome::Frame {
                start: 0,
                len: frame.len()
            }
        );
    }

    #[test]
    fn test_scan_skips_leading_noise() {
        for noise in 0..12 {
            let mut buf: Vec<u8> = (0..noise).map(|i| 0x10 + i as u8).collect();
            let frame = ping(7);
            buf.extend_from_slice(&frame);

            match scan(&buf, FrameKind::Message, MAX_FRAME_SIZE) {
                ScanOutcome::Frame { start, len } => {
                    assert_eq!(start, noise);
                    let msg = Message::decode(&buf[start..start + len]).unwrap();
                    assert_eq!(msg.sequence, 7);
                    assert_eq!(msg.command, "ping");
                }
                other => panic!("expected frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_scan_all_noise() {
        let buf = [0x00, 0x41, 0x42, 0x43];
        assert_eq!(
            scan(&buf, FrameKind::Message, MAX_FRAME_SIZE),
            ScanOutcome::Noise { discard: 4 }
        );
    }

    #[test]
    fn test_scan_keeps_split_marker() {
        let buf = [0x00, 0x01, 0xFE, 0xFF];
        assert_eq!(
            scan(&buf, FrameKind::Message, MAX_FRAME_SIZE),
            ScanOutcome::Noise { discard: 2 }
        );

        let buf = [0x00, 0xFE];
        assert_eq!(
            scan(&buf, FrameKind::Message, MAX_FRAME_SIZE),
            ScanOutcome::Noise { discard: 1 }
        );
    }

    #[test]
    fn test_scan_partial_frames() {
        let frame = ping(3);

        assert_eq!(
            scan(&frame[..4], FrameKind::Message, MAX_FRAME_SIZE),
            ScanOutcome::NeedHeader { start: 0 }
        );

        let outcome = scan(&frame[..10], FrameKind::Message, MAX_FRAME_SIZE);
        assert_eq!(
            outcome,
            ScanOutcome::NeedBody {
                start: 0,
                declared: frame.len()
            }
        );
        assert!(outcome.is_partial());
    }

    #[test]
    fn test_scan_end_marker_mismatch() {
        let mut frame = ping(0x0102_0304_0506_0708);
        let n = frame.len();
        frame[n - 2] = 0x00;

        assert_eq!(
            scan(&frame, FrameKind::Message, MAX_FRAME_SIZE),
            ScanOutcome::Corrupt {
                start: 0,
                end: n,
                sequence: Some(0x0102_0304_0506_0708)
            }
        );
    }

    #[test]
    fn test_scan_short_length_field_is_corrupt() {
        // Declared length one byte short: the EOM check lands on the wrong bytes.
        let mut frame = ping(42);
        let n = frame.len() as u16 - 1;
        frame[3..5].copy_from_slice(&n.to_be_bytes());

        match scan(&frame, FrameKind::Message, MAX_FRAME_SIZE) {
            ScanOutcome::Corrupt { sequence, end, .. } => {
                assert_eq!(sequence, Some(42));
                assert_eq!(end, n as usize);
            }
            other => panic!("expected corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_impossible_length() {
        let mut frame = ping(9);
        frame[3..5].copy_from_slice(&2u16.to_be_bytes());

        assert_eq!(
            scan(&frame, FrameKind::Message, MAX_FRAME_SIZE),
            ScanOutcome::Corrupt {
                start: 0,
                end: 3,
                sequence: Some(9)
            }
        );

        // Larger than the caller's buffer can ever hold.
        let frame = ping(9);
        match scan(&frame, FrameKind::Message, 8) {
            ScanOutcome::Corrupt { end, .. } => assert_eq!(end, 3),
            other => panic!("expected corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_recover_sequence_needs_full_field() {
        let frame = ping(77);
        assert_eq!(recover_sequence(&frame[..12]), None);
        assert_eq!(recover_sequence(&frame[..13]), Some(77));
    }

    #[test]
    fn test_open_envelope_rejects_bad_markers() {
        let frame = ping(1);

        let mut bad = frame.clone();
        bad[0] = 0x00;
        assert!(matches!(
            open_envelope(&bad, FrameKind::Message),
            Err(ProtocolError::InvalidStartMarker(_))
        ));

        let mut bad = frame.clone();
        let n = bad.len();
        bad[n - 1] = 0x00;
        assert!(matches!(
            open_envelope(&bad, FrameKind::Message),
            Err(ProtocolError::InvalidEndMarker(_))
        ));
    }

    #[test]
    fn test_open_envelope_rejects_interior_markers() {
        // SOM and EOM appear inside, but the outer bytes are wrong.
        let mut buf = vec![0x00];
        buf.extend_from_slice(&ping(1));
        buf.push(0x00);
        assert!(open_envelope(&buf, FrameKind::Message).is_err());
    }

    #[test]
    fn test_find_marker_from_offset() {
        let buf = [0xFE, 0xFF, 0xFE, 0x00, 0xFE, 0xFF, 0xFE];
        assert_eq!(find_marker(&buf, &SOM, 0), Some(0));
        assert_eq!(find_marker(&buf, &SOM, 1), Some(4));
        assert_eq!(find_marker(&buf, &SOM, 5), None);
        assert_eq!(find_marker(&buf, &EOM, 0), None);
    }
}
