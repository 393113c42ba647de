//! Serial Protocol Communication
//!
//! Implements the text protocol spoken by the PM detector: newline-terminated
//! command lines going out, flat brace-terminated maps coming back.

pub mod commands;
mod error;
pub mod frame;
pub mod response;
pub mod serial;
pub mod stream;

pub use commands::{Command, FunctionCode, Interval};
pub use error::{PendingBytes, ProtocolError, Result};
pub use frame::{read_frame, FrameReader, RawFrame};
pub use response::{parse_and_validate, Acknowledgment, FieldMap, ParameterReport, Response};
pub use serial::{configure_port, find_ch340_port, list_ports, open_port, PortInfo};
pub use stream::{SerialChannel, Transport};

/// Default baud rate of the detector's CH340 bridge
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Port-level read timeout in milliseconds.
/// Distinct from the per-operation timeout below.
pub const PORT_READ_TIMEOUT_MS: u64 = 2000;

/// Default wall-clock timeout for one request/response turn, in seconds
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Frames at least this long, received where a short acknowledgment was
/// expected, mean the link still holds bytes from an earlier turn.
pub const DESYNC_THRESHOLD: usize = 20;

/// pm2.5 readings above this value are sensor faults
pub const PM2_5_FAULT_LIMIT: u32 = 800;
