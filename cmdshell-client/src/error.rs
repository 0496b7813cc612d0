//! Client error types.

use cmdshell_protocol::{ResultCode, ResultType};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] cmdshell_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("no usable result for sequence {sequence} after {attempts} attempts")]
    RetriesExhausted { sequence: u64, attempts: u32 },

    #[error("device error: {code} - {message}")]
    Device { code: ResultCode, message: String },

    #[error("unexpected result type: expected {expected}, got {actual}")]
    UnexpectedData {
        expected: ResultType,
        actual: ResultType,
    },

    #[error("invalid command line: {0:?}")]
    InvalidCommand(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::ConnectionClosed => true,
            ClientError::RetriesExhausted { .. } => true,
            ClientError::Device { code, .. } => {
                matches!(code, ResultCode::IncompleteMessage | ResultCode::OperationPending)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(ClientError::RetriesExhausted {
            sequence: 1,
            attempts: 10
        }
        .is_retryable());
        assert!(ClientError::Device {
            code: ResultCode::OperationPending,
            message: String::new()
        }
        .is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
        assert!(!ClientError::Device {
            code: ResultCode::ParameterError,
            message: "bad pin".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_device_error_display() {
        let err = ClientError::Device {
            code: ResultCode::ParameterMissing,
            message: "Input pin number: 0 - 15".into(),
        };
        let text = err.to_string();
        assert!(text.contains("ParameterMissing"));
        assert!(text.contains("0 - 15"));
    }
}
