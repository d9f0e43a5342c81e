//! Acquisition Error Types
//!
//! Two layers of failure are modelled here:
//! - `AcqError`: ordinary Rust errors returned from fallible operations
//!   (configuration, transports, compiling tags).
//! - `ErrorCode`: per-tag outcomes that are delivered to the output sink as
//!   values; they never abort a polling cycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for voltage-acquisition operations
pub type Result<T> = std::result::Result<T, AcqError>;

/// Acquisition errors
#[derive(Debug, Error, Clone)]
pub enum AcqError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tag address cannot be represented on the wire
    #[error("Invalid address for tag '{tag}': {reason}")]
    InvalidAddress { tag: String, reason: String },

    /// Value encode/decode errors
    #[error("Codec error: {0}")]
    Codec(String),

    /// Transport level failures (socket, serial port)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Protocol-level errors (framing, checksum, unexpected function code)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),
}

impl AcqError {
    /// Shorthand for an `InvalidAddress` error
    pub fn invalid_address(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        AcqError::InvalidAddress {
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for AcqError {
    fn from(err: std::io::Error) -> Self {
        AcqError::Io(err.to_string())
    }
}

impl From<figment::Error> for AcqError {
    fn from(err: figment::Error) -> Self {
        AcqError::Config(err.to_string())
    }
}

/// Per-tag error code delivered to the output sink
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Tag could not be compiled into a wire address
    #[error("invalid address")]
    InvalidAddress,

    /// Transport send failed, the link was dropped
    #[error("plugin disconnected")]
    PluginDisconnected,

    /// No response within the receive window
    #[error("device not responding")]
    DeviceNotResponse,

    /// Response length, checksum or header mismatch
    #[error("protocol decode failure")]
    ProtocolDecodeFailure,

    /// Device answered a read with an exception
    #[error("read failure")]
    ReadFailure,

    /// Device answered a write with an exception
    #[error("write failure")]
    WriteFailure,

    /// Tag lives in a read-only area or cannot be written
    #[error("tag is read only")]
    TagReadOnly,

    /// Written value does not fit the declared type
    #[error("value type mismatch")]
    TypeMismatch,
}
