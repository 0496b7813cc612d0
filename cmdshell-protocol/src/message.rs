//! Command frames sent from the host to the device.

use crate::error::ProtocolError;
use crate::frame::{self, FrameKind, EOM, SOM};
use crate::{HEADER_SIZE, MAX_FRAME_SIZE, MIN_MESSAGE_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// A command with its arguments.
///
/// On the wire the command line is the command name followed by each argument
/// with a single ASCII space in front, so neither may contain a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Caller-assigned correlation number, echoed in the Result.
    pub sequence: u64,
    /// Opaque token echoed unchanged in the Result.
    pub callback_id: u16,
    pub command: String,
    pub args: Vec<String>,
}

impl Message {
    pub fn new(sequence: u64, callback_id: u16, command: impl Into<String>) -> Self {
        Self {
            sequence,
            callback_id,
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replaces the argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builds a message from a whitespace-separated command line.
    ///
    /// Returns `None` for a blank line.
    pub fn parse_line(sequence: u64, callback_id: u16, line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next()?;
        Some(Self::new(sequence, callback_id, command).with_args(tokens))
    }

    /// The command line as it appears on the wire.
    pub fn command_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Returns the argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Size of the encoded frame.
    pub fn encoded_len(&self) -> usize {
        MIN_MESSAGE_SIZE
            + self.command.len()
            + self.args.iter().map(|a| a.len() + 1).sum::<usize>()
    }

    /// Encodes the message into a complete frame.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.command.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        for token in std::iter::once(&self.command).chain(self.args.iter()) {
            if token.contains(' ') {
                return Err(ProtocolError::EmbeddedSpace(token.clone()));
            }
        }

        let total = self.encoded_len();
        if total > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(&SOM);
        buf.put_u16(total as u16);
        buf.put_u64(self.sequence);
        buf.put_u16(self.callback_id);
        buf.put_slice(self.command.as_bytes());
        for arg in &self.args {
            buf.put_u8(b' ');
            buf.put_slice(arg.as_bytes());
        }
        buf.put_slice(&EOM);

        debug_assert_eq!(buf.len(), total);
        Ok(buf.freeze())
    }

    /// Decodes a complete candidate frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope = frame::open_envelope(bytes, FrameKind::Message)?;

        let body = &bytes[HEADER_SIZE..bytes.len() - EOM.len()];
        let line = std::str::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8)?;

        let mut tokens = line.split(' ');
        let command = match tokens.next() {
            Some(cmd) if !cmd.is_empty() => cmd.to_string(),
            _ => return Err(ProtocolError::EmptyCommand),
        };

        Ok(Self {
            sequence: envelope.sequence,
            callback_id: envelope.callback_id,
            command,
            args: tokens.map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let msg = Message::new(0x0102, 0xBEEF, "ri").with_arg("7");
        let bytes = msg.encode().unwrap();

        assert_eq!(&bytes[..3], &SOM);
        assert_eq!(u16::from_be_bytes([bytes[3], bytes[4]]) as usize, bytes.len());
        assert_eq!(&bytes[5..13], &0x0102u64.to_be_bytes());
        assert_eq!(&bytes[13..15], &0xBEEFu16.to_be_bytes());
        assert_eq!(&bytes[15..19], b"ri 7");
        assert_eq!(&bytes[bytes.len() - 3..], &EOM);
        assert_eq!(bytes.len(), 22);
    }

    #[test]
    fn test_no_args_has_no_delimiter() {
        let bytes = Message::new(1, 0, "ping").encode().unwrap();
        assert_eq!(bytes.len(), MIN_MESSAGE_SIZE + 4);
        assert_eq!(&bytes[15..19], b"ping");
    }

    #[test]
    fn test_encode_rejects_space_in_argument() {
        let msg = Message::new(1, 0, "set").with_arg("a b");
        assert_eq!(
            msg.encode(),
            Err(ProtocolError::EmbeddedSpace("a b".to_string()))
        );
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let msg = Message::new(1, 0, "x".repeat(MAX_FRAME_SIZE));
        assert!(matches!(
            msg.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_too_short() {
        let bytes = Message::new(1, 0, "ping").encode().unwrap();
        assert_eq!(
            Message::decode(&bytes[..17]),
            Err(ProtocolError::TooShort { len: 17, min: 18 })
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut bytes = Message::new(1, 0, "ping").encode().unwrap().to_vec();
        bytes[4] += 1;
        assert!(matches!(
            Message::decode(&bytes),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_empty_command() {
        assert_eq!(
            Message::new(1, 0, "").encode(),
            Err(ProtocolError::EmptyCommand)
        );
        assert_eq!(
            Message::new(1, 0, "").with_arg("3").encode(),
            Err(ProtocolError::EmptyCommand)
        );
    }

    #[test]
    fn test_decode_empty_command() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&SOM);
        bytes.put_u16(MIN_MESSAGE_SIZE as u16);
        bytes.put_u64(1);
        bytes.put_u16(0);
        bytes.put_slice(&EOM);
        assert_eq!(Message::decode(&bytes), Err(ProtocolError::EmptyCommand));
    }

    #[test]
    fn test_parse_line() {
        let msg = Message::parse_line(5, 0, "  so   3 1 ").unwrap();
        assert_eq!(msg.command, "so");
        assert_eq!(msg.args, vec!["3", "1"]);
        assert_eq!(msg.command_line(), "so 3 1");
        assert_eq!(msg.arg(1), Some("1"));
        assert_eq!(msg.arg(2), None);

        assert!(Message::parse_line(5, 0, "   ").is_none());
    }

    fn token() -> impl Strategy<Value = String> {
        "[^ ]{1,12}"
    }

    proptest! {
        #[test]
        fn prop_message_roundtrip(
            sequence in any::<u64>(),
            callback_id in any::<u16>(),
            command in token(),
            args in prop::collection::vec(token(), 0..6),
        ) {
            let msg = Message::new(sequence, callback_id, command).with_args(args);
            let bytes = msg.encode().unwrap();
            prop_assert_eq!(bytes.len(), msg.encoded_len());
            prop_assert_eq!(Message::decode(&bytes).unwrap(), msg);
        }
    }
}
