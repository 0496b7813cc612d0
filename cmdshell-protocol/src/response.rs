//! Result frames sent from the device to the host.

use crate::error::ProtocolError;
use crate::frame::{self, FrameKind, EOM, SOM};
use crate::{HEADER_SIZE, MAX_FRAME_SIZE, MIN_RESPONSE_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Outcome classification carried by every Result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    Unsupported = 1,
    Timeout = 2,
    ParameterError = 3,
    ParameterMissing = 4,
    /// Handler invoked before it was started.
    Uninitialized = 5,
    /// Accepted, completes asynchronously.
    OperationPending = 6,
    /// The receiving peer failed to frame or decode; the sender should retry.
    IncompleteMessage = 253,
    InternalException = 254,
    /// No Result could be exchanged at all, e.g. the port is closed.
    UnspecifiedFailure = 255,
}

impl ResultCode {
    pub fn name(self) -> &'static str {
        match self {
            ResultCode::Success => "Success",
            ResultCode::Unsupported => "Unsupported",
            ResultCode::Timeout => "Timeout",
            ResultCode::ParameterError => "ParameterError",
            ResultCode::ParameterMissing => "ParameterMissing",
            ResultCode::Uninitialized => "Uninitialized",
            ResultCode::OperationPending => "OperationPending",
            ResultCode::IncompleteMessage => "IncompleteMessage",
            ResultCode::InternalException => "InternalException",
            ResultCode::UnspecifiedFailure => "UnspecifiedFailure",
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ResultCode::Success,
            1 => ResultCode::Unsupported,
            2 => ResultCode::Timeout,
            3 => ResultCode::ParameterError,
            4 => ResultCode::ParameterMissing,
            5 => ResultCode::Uninitialized,
            6 => ResultCode::OperationPending,
            253 => ResultCode::IncompleteMessage,
            254 => ResultCode::InternalException,
            255 => ResultCode::UnspecifiedFailure,
            other => return Err(ProtocolError::UnknownResultCode(other)),
        })
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tag selecting how a Result's data payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultType {
    Bitmap = 0,
    ByteArray = 1,
    Short = 2,
    UShort = 3,
    Int = 4,
    UInt = 5,
    Byte = 6,
    Long = 8,
    ULong = 9,
    String = 10,
    None = 255,
}

impl ResultType {
    pub fn name(self) -> &'static str {
        match self {
            ResultType::Bitmap => "Bitmap",
            ResultType::ByteArray => "ByteArray",
            ResultType::Short => "Short",
            ResultType::UShort => "UShort",
            ResultType::Int => "Int",
            ResultType::UInt => "UInt",
            ResultType::Byte => "Byte",
            ResultType::Long => "Long",
            ResultType::ULong => "ULong",
            ResultType::String => "String",
            ResultType::None => "None",
        }
    }

    /// Payload size for fixed-width types.
    fn fixed_width(self) -> Option<usize> {
        match self {
            ResultType::Byte => Some(1),
            ResultType::Short | ResultType::UShort => Some(2),
            ResultType::Int | ResultType::UInt => Some(4),
            ResultType::Long | ResultType::ULong => Some(8),
            ResultType::None => Some(0),
            ResultType::Bitmap | ResultType::ByteArray | ResultType::String => None,
        }
    }
}

impl TryFrom<u8> for ResultType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ResultType::Bitmap,
            1 => ResultType::ByteArray,
            2 => ResultType::Short,
            3 => ResultType::UShort,
            4 => ResultType::Int,
            5 => ResultType::UInt,
            6 => ResultType::Byte,
            8 => ResultType::Long,
            9 => ResultType::ULong,
            10 => ResultType::String,
            255 => ResultType::None,
            other => return Err(ProtocolError::UnknownResultType(other)),
        })
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed Result payload. The wire type tag follows from the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultData {
    Bitmap(Bytes),
    ByteArray(Bytes),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Byte(u8),
    Long(i64),
    ULong(u64),
    String(String),
    None,
}

impl ResultData {
    pub fn result_type(&self) -> ResultType {
        match self {
            ResultData::Bitmap(_) => ResultType::Bitmap,
            ResultData::ByteArray(_) => ResultType::ByteArray,
            ResultData::Short(_) => ResultType::Short,
            ResultData::UShort(_) => ResultType::UShort,
            ResultData::Int(_) => ResultType::Int,
            ResultData::UInt(_) => ResultType::UInt,
            ResultData::Byte(_) => ResultType::Byte,
            ResultData::Long(_) => ResultType::Long,
            ResultData::ULong(_) => ResultType::ULong,
            ResultData::String(_) => ResultType::String,
            ResultData::None => ResultType::None,
        }
    }

    /// Encoded payload size in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            ResultData::Bitmap(b) | ResultData::ByteArray(b) => b.len(),
            ResultData::String(s) => s.len(),
            other => other.result_type().fixed_width().unwrap_or(0),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ResultData::None)
    }

    fn put(&self, buf: &mut BytesMut) {
        match self {
            ResultData::Bitmap(b) | ResultData::ByteArray(b) => buf.put_slice(b),
            ResultData::Short(v) => buf.put_i16(*v),
            ResultData::UShort(v) => buf.put_u16(*v),
            ResultData::Int(v) => buf.put_i32(*v),
            ResultData::UInt(v) => buf.put_u32(*v),
            ResultData::Byte(v) => buf.put_u8(*v),
            ResultData::Long(v) => buf.put_i64(*v),
            ResultData::ULong(v) => buf.put_u64(*v),
            ResultData::String(s) => buf.put_slice(s.as_bytes()),
            ResultData::None => {}
        }
    }

    fn parse(result_type: ResultType, payload: &[u8]) -> Result<Self, ProtocolError> {
        if let Some(width) = result_type.fixed_width() {
            if payload.len() != width {
                return Err(ProtocolError::PayloadMismatch {
                    result_type: result_type.name(),
                    len: payload.len(),
                });
            }
        }

        let mut raw = [0u8; 8];
        raw[..payload.len().min(8)].copy_from_slice(&payload[..payload.len().min(8)]);

        Ok(match result_type {
            ResultType::Bitmap => ResultData::Bitmap(Bytes::copy_from_slice(payload)),
            ResultType::ByteArray => ResultData::ByteArray(Bytes::copy_from_slice(payload)),
            ResultType::Short => ResultData::Short(i16::from_be_bytes([raw[0], raw[1]])),
            ResultType::UShort => ResultData::UShort(u16::from_be_bytes([raw[0], raw[1]])),
            ResultType::Int => {
                ResultData::Int(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            ResultType::UInt => {
                ResultData::UInt(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            ResultType::Byte => ResultData::Byte(raw[0]),
            ResultType::Long => ResultData::Long(i64::from_be_bytes(raw)),
            ResultType::ULong => ResultData::ULong(u64::from_be_bytes(raw)),
            ResultType::String => ResultData::String(
                std::str::from_utf8(payload)
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string(),
            ),
            ResultType::None => ResultData::None,
        })
    }
}

impl fmt::Display for ResultData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultData::Bitmap(bytes) => {
                for byte in bytes.iter() {
                    write!(f, "{:08b}", byte)?;
                }
                Ok(())
            }
            ResultData::ByteArray(bytes) => {
                let mut first = true;
                for byte in bytes.iter() {
                    if !first {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", byte)?;
                    first = false;
                }
                Ok(())
            }
            ResultData::Short(v) => write!(f, "{}", v),
            ResultData::UShort(v) => write!(f, "{}", v),
            ResultData::Int(v) => write!(f, "{}", v),
            ResultData::UInt(v) => write!(f, "{}", v),
            ResultData::Byte(v) => write!(f, "{}", v),
            ResultData::Long(v) => write!(f, "{}", v),
            ResultData::ULong(v) => write!(f, "{}", v),
            ResultData::String(s) => f.write_str(s),
            ResultData::None => Ok(()),
        }
    }
}

/// A Result frame: outcome plus typed data, correlated by sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub sequence: u64,
    pub callback_id: u16,
    pub code: ResultCode,
    pub data: ResultData,
}

impl Response {
    pub fn new(sequence: u64, callback_id: u16, code: ResultCode, data: ResultData) -> Self {
        Self {
            sequence,
            callback_id,
            code,
            data,
        }
    }

    /// Successful Result carrying `data`.
    pub fn success(sequence: u64, callback_id: u16, data: ResultData) -> Self {
        Self::new(sequence, callback_id, ResultCode::Success, data)
    }

    /// Payload-less Result with the given code.
    pub fn status(sequence: u64, callback_id: u16, code: ResultCode) -> Self {
        Self::new(sequence, callback_id, code, ResultData::None)
    }

    /// Result carrying a diagnostic string.
    pub fn error(
        sequence: u64,
        callback_id: u16,
        code: ResultCode,
        message: impl Into<String>,
    ) -> Self {
        Self::new(sequence, callback_id, code, ResultData::String(message.into()))
    }

    /// Diagnostic sent when a frame could not be decoded.
    pub fn incomplete(sequence: u64) -> Self {
        Self::status(sequence, 0, ResultCode::IncompleteMessage)
    }

    pub fn result_type(&self) -> ResultType {
        self.data.result_type()
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Text shown to an operator: the rendered data, or the code name when
    /// there is none.
    pub fn display_text(&self) -> String {
        if self.data.is_none() {
            self.code.name().to_string()
        } else {
            self.data.to_string()
        }
    }

    pub fn encoded_len(&self) -> usize {
        MIN_RESPONSE_SIZE + self.data.encoded_len()
    }

    /// Encodes the Result into a complete frame.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
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
        buf.put_u8(self.code as u8);
        buf.put_u8(self.result_type() as u8);
        self.data.put(&mut buf);
        buf.put_slice(&EOM);

        debug_assert_eq!(buf.len(), total);
        Ok(buf.freeze())
    }

    /// Decodes a complete candidate frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope = frame::open_envelope(bytes, FrameKind::Response)?;

        let code = ResultCode::try_from(bytes[HEADER_SIZE])?;
        let result_type = ResultType::try_from(bytes[HEADER_SIZE + 1])?;
        let payload = &bytes[HEADER_SIZE + 2..bytes.len() - EOM.len()];

        Ok(Self {
            sequence: envelope.sequence,
            callback_id: envelope.callback_id,
            code,
            data: ResultData::parse(result_type, payload)?,
        })
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.sequence, self.code)?;
        if !self.data.is_none() {
            write!(f, " {}: {}", self.result_type(), self.data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_result_code_values() {
        assert_eq!(ResultCode::Success as u8, 0);
        assert_eq!(ResultCode::OperationPending as u8, 6);
        assert_eq!(ResultCode::IncompleteMessage as u8, 253);
        assert_eq!(ResultCode::UnspecifiedFailure as u8, 255);
        assert_eq!(
            ResultCode::try_from(7),
            Err(ProtocolError::UnknownResultCode(7))
        );
    }

    #[test]
    fn test_result_type_values() {
        assert_eq!(ResultType::Byte as u8, 6);
        assert_eq!(ResultType::Long as u8, 8);
        assert_eq!(ResultType::None as u8, 255);
        assert_eq!(
            ResultType::try_from(7),
            Err(ProtocolError::UnknownResultType(7))
        );
    }

    #[test]
    fn test_encode_layout() {
        let resp = Response::success(9, 3, ResultData::UShort(0x1234));
        let bytes = resp.encode().unwrap();

        assert_eq!(bytes.len(), MIN_RESPONSE_SIZE + 2);
        assert_eq!(&bytes[..3], &SOM);
        assert_eq!(u16::from_be_bytes([bytes[3], bytes[4]]) as usize, bytes.len());
        assert_eq!(&bytes[5..13], &9u64.to_be_bytes());
        assert_eq!(&bytes[13..15], &3u16.to_be_bytes());
        assert_eq!(bytes[15], 0);
        assert_eq!(bytes[16], 3);
        assert_eq!(&bytes[17..19], &[0x12, 0x34]);
        assert_eq!(&bytes[19..], &EOM);
    }

    #[test]
    fn test_none_payload_roundtrip() {
        let resp = Response::incomplete(77);
        let bytes = resp.encode().unwrap();
        assert_eq!(bytes.len(), MIN_RESPONSE_SIZE);

        let decoded = Response::decode(&bytes).unwrap();
        assert_eq!(decoded.code, ResultCode::IncompleteMessage);
        assert_eq!(decoded.sequence, 77);
        assert_eq!(decoded.callback_id, 0);
        assert!(decoded.data.is_none());
    }

    #[test]
    fn test_decode_rejects_wrong_payload_width() {
        let mut bytes = Response::success(1, 0, ResultData::UShort(5))
            .encode()
            .unwrap()
            .to_vec();
        // Retag the two-byte payload as UInt.
        bytes[16] = ResultType::UInt as u8;
        assert_eq!(
            Response::decode(&bytes),
            Err(ProtocolError::PayloadMismatch {
                result_type: "UInt",
                len: 2
            })
        );
    }

    #[test]
    fn test_decode_rejects_bad_markers() {
        let bytes = Response::success(1, 0, ResultData::Byte(1)).encode().unwrap();

        let mut bad = bytes.to_vec();
        bad[1] = 0x00;
        assert!(matches!(
            Response::decode(&bad),
            Err(ProtocolError::InvalidStartMarker(_))
        ));

        let mut bad = bytes.to_vec();
        let n = bad.len();
        bad[n - 2] = 0x02;
        assert!(matches!(
            Response::decode(&bad),
            Err(ProtocolError::InvalidEndMarker(_))
        ));

        assert!(matches!(
            Response::decode(&bytes[..19]),
            Err(ProtocolError::TooShort { min: 20, .. })
        ));
    }

    #[test]
    fn test_data_display() {
        assert_eq!(
            ResultData::Bitmap(Bytes::from_static(&[0b1000_0001, 0x0F])).to_string(),
            "1000000100001111"
        );
        assert_eq!(
            ResultData::ByteArray(Bytes::from_static(&[1, 20, 255])).to_string(),
            "1 20 255"
        );
        assert_eq!(ResultData::Short(-3).to_string(), "-3");
        assert_eq!(ResultData::String("12:00".into()).to_string(), "12:00");
        assert_eq!(ResultData::None.to_string(), "");
    }

    #[test]
    fn test_display_text_falls_back_to_code() {
        let resp = Response::status(1, 0, ResultCode::ParameterMissing);
        assert_eq!(resp.display_text(), "ParameterMissing");

        let resp = Response::success(1, 0, ResultData::Byte(1));
        assert_eq!(resp.display_text(), "1");
    }

    fn result_data() -> impl Strategy<Value = ResultData> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..32)
                .prop_map(|v| ResultData::Bitmap(Bytes::from(v))),
            prop::collection::vec(any::<u8>(), 0..32)
                .prop_map(|v| ResultData::ByteArray(Bytes::from(v))),
            any::<i16>().prop_map(ResultData::Short),
            any::<u16>().prop_map(ResultData::UShort),
            any::<i32>().prop_map(ResultData::Int),
            any::<u32>().prop_map(ResultData::UInt),
            any::<u8>().prop_map(ResultData::Byte),
            any::<i64>().prop_map(ResultData::Long),
            any::<u64>().prop_map(ResultData::ULong),
            ".{0,40}".prop_map(ResultData::String),
            Just(ResultData::None),
        ]
    }

    fn result_code() -> impl Strategy<Value = ResultCode> {
        prop::sample::select(vec![
            ResultCode::Success,
            ResultCode::Unsupported,
            ResultCode::Timeout,
            ResultCode::ParameterError,
            ResultCode::ParameterMissing,
            ResultCode::Uninitialized,
            ResultCode::OperationPending,
            ResultCode::IncompleteMessage,
            ResultCode::InternalException,
            ResultCode::UnspecifiedFailure,
        ])
    }

    proptest! {
        #[test]
        fn prop_response_roundtrip(
            sequence in any::<u64>(),
            callback_id in any::<u16>(),
            code in result_code(),
            data in result_data(),
        ) {
            let resp = Response::new(sequence, callback_id, code, data);
            let bytes = resp.encode().unwrap();
            prop_assert_eq!(bytes.len(), resp.encoded_len());
            prop_assert_eq!(Response::decode(&bytes).unwrap(), resp);
        }
    }
}
