//! RTU master error types
//!
//! Every failure a caller can observe travels through the same `Result`
//! channel as a successful reading.

use std::time::Duration;
use thiserror::Error;

/// Result type for rtu-master operations
pub type Result<T> = std::result::Result<T, RtuError>;

/// RTU master errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtuError {
    /// Session is not connected
    #[error("Port not open")]
    PortNotOpen,

    /// Missing or invalid unit/register address
    #[error("Bad address: {0}")]
    BadAddress(String),

    /// Request parameter outside its protocol range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Identifier already has a live transaction
    #[error("Transaction {0} already pending")]
    DuplicatePending(u16),

    /// Response failed CRC validation
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{received:04X}")]
    ChecksumMismatch { expected: u16, received: u16 },

    /// No valid response within the configured duration
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Underlying connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Session closed while the request was outstanding
    #[error("Session closed")]
    SessionClosed,

    /// CRC-valid frame whose header disagrees with its contents
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Too many requests already waiting for the line
    #[error("Request queue full ({0} waiting)")]
    QueueFull(usize),

    /// Slave answered with an exception response
    #[error("Modbus exception 0x{code:02X} for FC{function:02X}: {}", describe(.code))]
    Exception { function: u8, code: u8 },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

fn describe(code: &u8) -> &'static str {
    crate::frame::exception_description(*code)
}

impl From<std::io::Error> for RtuError {
    fn from(err: std::io::Error) -> Self {
        RtuError::Transport(err.to_string())
    }
}

impl From<figment::Error> for RtuError {
    fn from(err: figment::Error) -> Self {
        RtuError::Config(err.to_string())
    }
}

impl RtuError {
    pub fn bad_address(msg: impl Into<String>) -> Self {
        RtuError::BadAddress(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        RtuError::InvalidArgument(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        RtuError::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        RtuError::Config(msg.into())
    }

    /// Worth retrying at the request level
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RtuError::Timeout(_) | RtuError::ChecksumMismatch { .. } | RtuError::QueueFull(_)
        )
    }

    /// Check if this error indicates a need for reconnection
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            RtuError::PortNotOpen | RtuError::Transport(_) | RtuError::SessionClosed
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RtuError::Timeout(Duration::from_millis(100)).is_retryable());
        assert!(RtuError::ChecksumMismatch {
            expected: 1,
            received: 2
        }
        .is_retryable());
        assert!(RtuError::QueueFull(32).is_retryable());
        assert!(!RtuError::PortNotOpen.is_retryable());
        assert!(!RtuError::InvalidResponse("byte count".into()).is_retryable());

        assert!(RtuError::PortNotOpen.needs_reconnect());
        assert!(RtuError::transport("unplugged").needs_reconnect());
        assert!(RtuError::SessionClosed.needs_reconnect());
        assert!(!RtuError::bad_address("unit 0").needs_reconnect());
    }

    #[test]
    fn test_error_display() {
        let err = RtuError::ChecksumMismatch {
            expected: 0xC8C5,
            received: 0xFFFF,
        };
        assert_eq!(err.to_string(), "CRC mismatch: expected 0xC8C5, got 0xFFFF");

        let err = RtuError::Exception {
            function: 0x03,
            code: 0x02,
        };
        assert!(err.to_string().contains("Illegal Data Address"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Broken pipe");
        let err: RtuError = io.into();
        assert!(matches!(err, RtuError::Transport(msg) if msg.contains("Broken pipe")));
    }
}
