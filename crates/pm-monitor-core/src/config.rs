//! Monitor configuration
//!
//! Stored as JSON. Every field has a default, so an empty object is a valid
//! configuration file.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{DriverConfig, ProtocolTiming};
use crate::protocol::{Interval, DEFAULT_BAUD_RATE, DEFAULT_OPERATION_TIMEOUT_SECS};
use crate::record::{PM_MONITOR_ID, PM_MONITOR_MODEL};

/// Environment variable overriding the configured serial port
pub const PORT_ENV_VAR: &str = "PM_MONITOR_SERIAL_PORT";

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port name. Absent or empty means: find the CH340 bridge.
    pub port: Option<String>,

    /// Baud rate
    pub baud_rate: u32,

    /// Limit for one request/response turn, in seconds
    pub timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

/// Everything the monitor needs to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub connection: ConnectionSettings,

    /// Push interval written to the device at startup
    pub send_interval: Interval,

    /// Storage interval written to the device at startup
    pub store_interval: Interval,

    /// Pause after each measurement cycle, in milliseconds
    pub cycle_pause_ms: u64,

    /// Resynchronise the device clock every this many cycles (0 = never)
    pub clock_sync_cycles: u32,

    /// Model name stamped on records
    pub model: String,

    /// Sensor id stamped on records
    pub id: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            send_interval: Interval::default(),
            store_interval: Interval::default(),
            cycle_pause_ms: 3500,
            // ~24 hours of 5 second cycles
            clock_sync_cycles: 17280,
            model: PM_MONITOR_MODEL.to_string(),
            id: PM_MONITOR_ID,
        }
    }
}

impl MonitorConfig {
    /// Load a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Load a configuration file if one is given, then apply environment overrides
    pub fn resolve<P: AsRef<Path>>(path: Option<P>) -> io::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_port_override(std::env::var(PORT_ENV_VAR).ok());
        Ok(config)
    }

    /// Replace the port with `value` when it is set. An empty value selects
    /// auto-detection.
    pub fn apply_port_override(&mut self, value: Option<String>) {
        if let Some(port) = value {
            tracing::debug!(port = %port, "serial port taken from {}", PORT_ENV_VAR);
            self.connection.port = Some(port);
        }
    }

    /// Driver settings derived from this configuration
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            port_name: self.connection.port.clone().unwrap_or_default(),
            baud_rate: self.connection.baud_rate,
            timeout: Duration::from_secs(self.connection.timeout_secs),
            timing: ProtocolTiming::default(),
        }
    }

    pub fn cycle_pause(&self) -> Duration {
        Duration::from_millis(self.cycle_pause_ms)
    }
}
