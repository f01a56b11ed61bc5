//! # Voltage Modbus Link Error Handling
//!
//! Every fallible operation in this crate returns [`ModbusResult`]. The variants of
//! [`ModbusError`] fall into five classes, and callers usually only care about the class:
//!
//! ## Error Classes
//!
//! ### Contract Violations
//! - **Invalid Argument**: the caller passed a zero count, a result buffer that is too
//!   small or a write that cannot fit in one frame. Raised before any I/O, nothing is
//!   sent on the wire.
//!
//! ### Transport-Fatal Errors
//! - **I/O / Connection / Timeout**: the channel is broken
//! - **Stream Closed**: the peer closed the stream, possibly mid-frame
//! - **Invalid Header**: a TCP header failed validation, the channel has been closed
//!
//! A slave serving loop ends on the first transport-fatal error.
//!
//! ### Frame Errors
//! - **Frame / LRC Mismatch**: one ASCII frame could not be decoded. The frame is
//!   dropped but the transport stays positioned for the next one.
//!
//! ### Protocol Errors
//! - **Protocol / Unexpected Response**: a response arrived but failed the acceptance
//!   checks (wrong transaction id, unit id, function code or length).
//!
//! ### Exceptions
//! - **Exception**: the slave answered with a Modbus exception response.
//!
//! ## Example
//!
//! ```rust
//! use voltage_modbus_link::{ModbusError, ModbusResult};
//!
//! fn report(result: ModbusResult<()>) {
//!     match result {
//!         Ok(()) => println!("ok"),
//!         Err(e) if e.is_fatal() => println!("session over: {}", e),
//!         Err(e) => println!("retry later: {}", e),
//!     }
//! }
//! ```

use std::io::ErrorKind;
use thiserror::Error;

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus error types
///
/// See the module documentation for how variants map onto error classes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// Caller contract violation (bad count, undersized buffer, oversized write)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// I/O related errors (network, in-process channel)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or use on a closed transport
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The peer closed the stream before a complete frame arrived
    #[error("Stream closed by peer")]
    StreamClosed,

    /// Timeout errors
    ///
    /// Only produced when a transport was configured with an I/O timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// TCP header validation failure
    ///
    /// The channel is closed before this error is returned.
    #[error("Invalid header: {message}")]
    InvalidHeader { message: String },

    /// Frame decoding failure (ASCII markers, hex digits, length)
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// ASCII checksum failure
    #[error("LRC validation failed: expected={expected:02X}, actual={actual:02X}")]
    LrcMismatch { expected: u8, actual: u8 },

    /// Protocol-level errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// A response that does not answer the request that was sent
    #[error("Unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// Modbus exception response
    ///
    /// # Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Illegal Response Length
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Bank access outside the bank's bounds
    #[error("Invalid address: start={start}, count={count}, size={size}")]
    InvalidAddress { start: usize, count: usize, size: usize },

    /// Operation the transport does not implement
    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (poisoned locks and the like)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a contract violation error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a TCP header validation error
    pub fn invalid_header<S: Into<String>>(message: S) -> Self {
        Self::InvalidHeader { message: message.into() }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create an LRC mismatch error
    pub fn lrc_mismatch(expected: u8, actual: u8) -> Self {
        Self::LrcMismatch { expected, actual }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create an unexpected response error
    pub fn unexpected_response<S: Into<String>>(message: S) -> Self {
        Self::UnexpectedResponse { message: message.into() }
    }

    /// Create a Modbus exception error
    ///
    /// Maps the exception codes this crate produces to readable messages.
    ///
    /// # Arguments
    ///
    /// * `function` - Function code of the failed request (without the 0x80 bit)
    /// * `code` - Modbus exception code
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Illegal Response Length",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create a bank bounds error
    pub fn invalid_address(start: usize, count: usize, size: usize) -> Self {
        Self::InvalidAddress { start, count, size }
    }

    /// Create an unsupported operation error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error ends the session
    ///
    /// A transport that returned a fatal error should not be used again.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_modbus_link::ModbusError;
    ///
    /// assert!(ModbusError::StreamClosed.is_fatal());
    /// assert!(!ModbusError::lrc_mismatch(0x10, 0x11).is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Connection { .. }
                | Self::StreamClosed
                | Self::Timeout { .. }
                | Self::InvalidHeader { .. }
                | Self::Unsupported { .. }
                | Self::Internal { .. }
        )
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Connection { .. }
                | Self::StreamClosed
                | Self::Timeout { .. }
                | Self::InvalidHeader { .. }
        )
    }

    /// Check if only a single frame was lost
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Self::Frame { .. } | Self::LrcMismatch { .. })
    }

    /// Check if a response failed the acceptance checks
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::UnexpectedResponse { .. })
    }

    /// Check if the caller broke the API contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Check if the peer answered with an exception response
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    /// Exception code carried by an exception response, if any
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            Self::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if the error is recoverable (the same call may be retried)
    ///
    /// Frame, protocol and exception failures leave the connection usable.
    /// A timeout is retryable on a fresh connection.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_modbus_link::ModbusError;
    ///
    /// assert!(ModbusError::unexpected_response("txid").is_recoverable());
    /// assert!(!ModbusError::invalid_argument("count is zero").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Frame { .. } | Self::LrcMismatch { .. } => true,
            Self::Protocol { .. } | Self::UnexpectedResponse { .. } => true,
            Self::Exception { .. } => true,
            _ => false,
        }
    }
}

/// Convert from std::io::Error
///
/// An unexpected EOF means the peer closed the stream mid-frame.
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::UnexpectedEof => Self::StreamClosed,
            _ => Self::io(err.to_string()),
        }
    }
}

/// Convert from tokio timeout errors
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}
