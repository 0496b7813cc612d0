//! Device error types.

use cmdshell_protocol::{Message, ProtocolError, ResultCode, Response};
use thiserror::Error;

/// Device errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    MissingParameter(String),

    #[error("{0}")]
    InvalidParameter(String),

    #[error("{0} module not started")]
    NotStarted(&'static str),

    #[error("hardware fault: {0}")]
    Hardware(String),

    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    #[error("port closed")]
    PortClosed,

    #[error("device shutting down")]
    ShuttingDown,
}

impl DeviceError {
    /// Converts to the wire result code.
    pub fn result_code(&self) -> ResultCode {
        match self {
            DeviceError::MissingParameter(_) => ResultCode::ParameterMissing,
            DeviceError::InvalidParameter(_) => ResultCode::ParameterError,
            DeviceError::NotStarted(_) => ResultCode::Uninitialized,
            DeviceError::Protocol(_) => ResultCode::IncompleteMessage,
            DeviceError::Hardware(_) | DeviceError::HandlerPanic(_) | DeviceError::Io(_) => {
                ResultCode::InternalException
            }
            DeviceError::PortClosed | DeviceError::ShuttingDown => ResultCode::UnspecifiedFailure,
        }
    }

    /// Builds the Result answering `msg` with this error.
    ///
    /// `Uninitialized` carries no data; every other code carries the message.
    pub fn to_response(&self, msg: &Message) -> Response {
        let code = self.result_code();
        match self {
            DeviceError::NotStarted(_) => Response::status(msg.sequence, msg.callback_id, code),
            _ => Response::error(msg.sequence, msg.callback_id, code, self.to_string()),
        }
    }
}
