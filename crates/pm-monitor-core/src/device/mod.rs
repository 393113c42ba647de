//! PM detector device model
//!
//! The driver, the configuration it caches and the measurements it reads.

pub mod driver;
pub mod measurement;
pub mod state;

pub use driver::{DeviceDriver, DriverConfig, ProtocolTiming};
pub use measurement::{Measurement, MEASUREMENT_FIELD_COUNT};
pub use state::{DeviceState, StreamingState, WRITE_POINT_MAX_AGE};
