//! Protocol errors

use std::fmt;
use std::io;

use thiserror::Error;

use super::FunctionCode;

/// Result alias used throughout the driver
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Bytes waiting in each direction of the link, captured for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingBytes {
    /// Bytes received but not yet read
    pub input: u32,
    /// Bytes written but not yet transmitted
    pub output: u32,
}

impl fmt::Display for PendingBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read buffer: {} write buffer: {}", self.input, self.output)
    }
}

/// Errors that can occur while talking to the detector
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Unexpected byte {byte:#04x} after {partial:?}")]
    Encoding { byte: u8, partial: String },

    #[error("Timed out waiting for '}}', received {partial:?} ({pending})")]
    FramingTimeout {
        partial: String,
        pending: PendingBytes,
    },

    #[error("Response code mismatch: expected {expected}, got {actual:?}")]
    ProtocolMismatch {
        expected: FunctionCode,
        actual: String,
    },

    #[error("Malformed response ({reason}): {raw:?} ({pending_input} bytes pending)")]
    MalformedResponse {
        reason: String,
        raw: String,
        pending_input: u32,
    },

    #[error("PM2.5 reading above 800, reading {0}")]
    SensorFault(u32),

    #[error("Desynchronised link, discarded {length} byte response {raw:?}")]
    DesyncSuspected { raw: String, length: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),
}

impl ProtocolError {
    pub(crate) fn malformed(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse {
            reason: reason.into(),
            raw: raw.into(),
            pending_input: 0,
        }
    }

    /// Whether a later attempt on the same link can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProtocolError::SerialError(_)
            | ProtocolError::InvalidArgument(_)
            | ProtocolError::PortNotFound(_) => false,
            ProtocolError::Transport(_) => !self.is_link_lost(),
            _ => true,
        }
    }

    /// Whether the serial device itself has gone away
    pub fn is_link_lost(&self) -> bool {
        match self {
            ProtocolError::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::NotFound
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
