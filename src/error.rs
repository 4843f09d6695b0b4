//! Core error types and result handling
//!
//! Every fallible operation in this crate returns [`ModbusResult`], so a
//! polling loop can treat any failure uniformly while still being able to
//! inspect the kind:
//!
//! - [`ModbusError::Configuration`] - invalid host/port/unit id; the one
//!   error that aborts client construction outright.
//! - [`ModbusError::Frame`] - malformed byte stream; tears down the affected
//!   connection only.
//! - [`ModbusError::Exception`] - in-band Modbus exception reported by the
//!   server (illegal function/address/value and friends).
//! - [`ModbusError::Timeout`] - no matching response within the deadline;
//!   non-fatal, the connection stays open.
//! - [`ModbusError::InvalidRequest`] - client-side pre-send validation
//!   rejection; no network I/O occurred.

use thiserror::Error;

use crate::protocol::ExceptionCode;

/// Result type used throughout the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus error type covering configuration, framing, protocol and I/O failures
#[derive(Error, Debug)]
pub enum ModbusError {
    /// Invalid host, port or unit identifier supplied at construction or
    /// through a setter
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Malformed MBAP header or PDU on the wire
    #[error("frame error: {message}")]
    Frame { message: String },

    /// Exception response returned by the server
    #[error("modbus exception for function 0x{function:02X}: {code}")]
    Exception { function: u8, code: ExceptionCode },

    /// Operation did not complete within the configured deadline
    #[error("timeout during {operation} after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Request rejected by client-side validation before any frame was built
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Function code not recognized by this implementation
    #[error("invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Connection-level failure (connect refused, peer closed, not open)
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Underlying socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModbusError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a frame error
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create an exception error from a response function code and exception code
    pub fn exception(function: u8, code: ExceptionCode) -> Self {
        Self::Exception {
            function: function & 0x7F,
            code,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Whether this error is a response timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The server-reported exception code, if this error carries one
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Self::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModbusError::exception(0x83, ExceptionCode::IllegalDataAddress);
        let text = err.to_string();
        assert!(text.contains("0x03"), "masks exception bit: {text}");
        assert!(text.contains("illegal data address"));

        let err = ModbusError::timeout("read response", 3000);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("3000 ms"));
    }

    #[test]
    fn test_exception_code_accessor() {
        let err = ModbusError::exception(0x03, ExceptionCode::IllegalDataValue);
        assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataValue));
        assert_eq!(ModbusError::frame("oops").exception_code(), None);
    }
}
