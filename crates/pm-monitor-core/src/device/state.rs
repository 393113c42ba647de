//! Cached device configuration

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::protocol::ParameterReport;

/// The write pointer moves continuously while streaming; older copies are refetched
pub const WRITE_POINT_MAX_AGE: Duration = Duration::from_secs(30);

/// Whether the device is pushing measurements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamingState {
    /// Nothing observed yet
    #[default]
    Unknown,
    /// Start acknowledged, or reported by the device
    Streaming,
    /// Stop sent, or reported by the device
    Idle,
}

/// Last known device configuration.
///
/// Every field starts absent; a parameter report fills all of them at once.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    send_interval: Option<u16>,
    store_interval: Option<u16>,
    write_point: Option<String>,
    read_point: Option<String>,
    streaming: StreamingState,
    last_fetch: Option<Instant>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_interval(&self) -> Option<u16> {
        self.send_interval
    }

    pub fn store_interval(&self) -> Option<u16> {
        self.store_interval
    }

    pub fn write_point(&self) -> Option<&str> {
        self.write_point.as_deref()
    }

    pub fn read_point(&self) -> Option<&str> {
        self.read_point.as_deref()
    }

    pub fn streaming(&self) -> StreamingState {
        self.streaming
    }

    pub fn last_fetch(&self) -> Option<Instant> {
        self.last_fetch
    }

    /// Replace every cached field with the contents of one report
    pub(crate) fn apply_report(&mut self, report: &ParameterReport, fetched_at: Instant) {
        self.send_interval = Some(report.send_interval);
        self.store_interval = Some(report.store_interval);
        self.write_point = Some(report.write_point.clone());
        self.read_point = Some(report.read_point.clone());
        self.streaming = if report.send_flag {
            StreamingState::Streaming
        } else {
            StreamingState::Idle
        };
        self.last_fetch = Some(fetched_at);
    }

    pub(crate) fn set_streaming(&mut self, streaming: StreamingState) {
        self.streaming = streaming;
    }

    /// Whether the cached write pointer must be refetched at `now`
    pub fn write_point_stale(&self, now: Instant) -> bool {
        match (self.write_point.as_ref(), self.last_fetch) {
            (Some(_), Some(fetched)) => now.saturating_duration_since(fetched) >= WRITE_POINT_MAX_AGE,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FieldMap;

    fn report(send_flag: bool) -> ParameterReport {
        ParameterReport {
            send_flag,
            send_interval: 5,
            store_interval: 60,
            write_point: "000123".to_string(),
            read_point: "000100".to_string(),
            fields: FieldMap::new(),
        }
    }

    #[test]
    fn test_starts_empty() {
        let state = DeviceState::new();
        assert_eq!(state.streaming(), StreamingState::Unknown);
        assert_eq!(state.send_interval(), None);
        assert_eq!(state.write_point(), None);
        assert!(state.write_point_stale(Instant::now()));
    }

    #[test]
    fn test_apply_report_fills_everything() {
        let mut state = DeviceState::new();
        let now = Instant::now();
        state.apply_report(&report(true), now);
        assert_eq!(state.send_interval(), Some(5));
        assert_eq!(state.store_interval(), Some(60));
        assert_eq!(state.write_point(), Some("000123"));
        assert_eq!(state.read_point(), Some("000100"));
        assert_eq!(state.streaming(), StreamingState::Streaming);
        assert_eq!(state.last_fetch(), Some(now));

        state.apply_report(&report(false), now);
        assert_eq!(state.streaming(), StreamingState::Idle);
    }

    #[test]
    fn test_write_point_goes_stale_after_thirty_seconds() {
        let mut state = DeviceState::new();
        let fetched = Instant::now();
        state.apply_report(&report(false), fetched);
        assert!(!state.write_point_stale(fetched + Duration::from_secs(29)));
        assert!(state.write_point_stale(fetched + WRITE_POINT_MAX_AGE));
    }
}
