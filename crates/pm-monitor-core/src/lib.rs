//! # PM Monitor Core Library
//!
//! Driver and supervisor for a particulate-matter detector attached over a
//! CH340 USB-serial bridge.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The detector's line protocol: command encoding, frame reading and
//!   response validation
//! - A blocking device driver with a cached view of the device configuration
//! - A supervisor that polls record sources and hands records to storage
//!
//! ## Example
//!
//! ```rust,ignore
//! use pm_monitor_core::prelude::*;
//!
//! // Open the only CH340 port on this machine
//! let mut driver = DeviceDriver::open(&DriverConfig::default())?;
//!
//! driver.set_send_interval("005")?;
//! let measurement = driver.read_measurement()?;
//! driver.stop_streaming()?;
//! println!("PM2.5: {}", measurement.pm2_5);
//! ```

pub mod config;
pub mod device;
pub mod monitor;
pub mod protocol;
pub mod record;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::MonitorConfig;
    pub use crate::device::{
        DeviceDriver, DeviceState, DriverConfig, Measurement, ProtocolTiming, StreamingState,
    };
    pub use crate::monitor::{DeviceCycle, JsonLinesSink, Monitor, RecordSink, RecordSource};
    pub use crate::protocol::{
        Command, FunctionCode, Interval, ParameterReport, ProtocolError, SerialChannel, Transport,
    };
    pub use crate::record::SensorRecord;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
