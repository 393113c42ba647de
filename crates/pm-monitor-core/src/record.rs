//! Sensor records
//!
//! The shape handed to storage and metrics collaborators: `time`, `model`,
//! `id`, plus whatever fields the producing sensor reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model name of records produced by the detector driver
pub const PM_MONITOR_MODEL: &str = "PM-Monitor";

/// Sensor id of records produced by the detector driver
pub const PM_MONITOR_ID: u32 = 100;

/// One timestamped reading from one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub time: String,
    pub model: String,
    pub id: u32,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl SensorRecord {
    pub fn new(time: impl Into<String>, model: impl Into<String>, id: u32) -> Self {
        Self {
            time: time.into(),
            model: model.into(),
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Add a domain field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether this record came from the given sensor
    pub fn is_from(&self, model: &str, id: u32) -> bool {
        self.model == model && self.id == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_round_trip() {
        let record = SensorRecord::new("2023-05-12 14:03:27", "Outdoor Humidity", 110)
            .with_field("humidity", "81");
        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(
            text,
            "{\"time\":\"2023-05-12 14:03:27\",\"model\":\"Outdoor Humidity\",\"id\":110,\"humidity\":\"81\"}"
        );
        let back: SensorRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
        assert!(back.is_from("Outdoor Humidity", 110));
        assert!(!back.is_from(PM_MONITOR_MODEL, PM_MONITOR_ID));
    }
}
