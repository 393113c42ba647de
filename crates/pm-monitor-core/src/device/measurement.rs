//! Measurement frames pushed by the detector while streaming

use serde::{Deserialize, Serialize};

use crate::protocol::response::{field, parse_field};
use crate::protocol::{FieldMap, ProtocolError, PM2_5_FAULT_LIMIT};
use crate::record::SensorRecord;

/// Number of fields in every measurement frame
pub const MEASUREMENT_FIELD_COUNT: usize = 16;

/// One reading of the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Device clock at the time of the reading, `y-m-d h:min:sec` as sent
    pub time: String,
    #[serde(rename = "temperature_C")]
    pub temperature_c: f64,
    pub humidity: f64,
    pub pm2_5: u32,
    pub pm1_0: u32,
    pub pm10: u32,
}

impl Measurement {
    /// Build a measurement from a decoded frame.
    ///
    /// The frame must carry exactly 16 fields. A pm2.5 value above 800 is a
    /// sensor fault and never yields a measurement.
    pub fn from_fields(fields: &FieldMap) -> Result<Self, ProtocolError> {
        if fields.len() != MEASUREMENT_FIELD_COUNT {
            return Err(ProtocolError::malformed(
                format!(
                    "expected {} fields, got {}",
                    MEASUREMENT_FIELD_COUNT,
                    fields.len()
                ),
                format!("{:?}", fields),
            ));
        }

        let pm2_5: u32 = parse_field(fields, "cpm2.5")?;
        if pm2_5 > PM2_5_FAULT_LIMIT {
            return Err(ProtocolError::SensorFault(pm2_5));
        }

        let time = format!(
            "{}-{}-{} {}:{}:{}",
            field(fields, "y")?,
            field(fields, "m")?,
            field(fields, "d")?,
            field(fields, "h")?,
            field(fields, "min")?,
            field(fields, "sec")?
        );

        Ok(Self {
            time,
            temperature_c: parse_field(fields, "t")?,
            humidity: parse_field(fields, "r")?,
            pm2_5,
            pm1_0: parse_field(fields, "cpm1.0")?,
            pm10: parse_field(fields, "cpm10")?,
        })
    }

    /// Convert to the record shape consumed by storage and metrics
    pub fn to_record(&self, model: &str, id: u32) -> SensorRecord {
        SensorRecord::new(self.time.clone(), model, id)
            .with_field("temperature_C", self.temperature_c)
            .with_field("humidity", self.humidity)
            .with_field("pm2_5", self.pm2_5)
            .with_field("pm1_0", self.pm1_0)
            .with_field("pm10", self.pm10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::response::decode_fields;
    use pretty_assertions::assert_eq;

    /// A frame as pushed by the detector, with pm2.5 substituted
    fn frame_text(pm2_5: u32) -> String {
        format!(
            "{{\"y\":\"23\",\"m\":\"05\",\"d\":\"12\",\"h\":\"14\",\"min\":\"03\",\"sec\":\"27\",\
             \"t\":\"21.4\",\"r\":\"48\",\"cpm2.5\":\"{}\",\"cpm1.0\":\"9\",\"cpm10\":\"15\",\
             \"pm2.5\":\"0\",\"pm1.0\":\"0\",\"pm10\":\"0\",\"hcho\":\"0\",\"tvoc\":\"0\"}}",
            pm2_5
        )
    }

    #[test]
    fn test_builds_from_sixteen_fields() {
        let fields = decode_fields(&frame_text(12)).unwrap();
        let m = Measurement::from_fields(&fields).unwrap();
        assert_eq!(
            m,
            Measurement {
                time: "23-05-12 14:03:27".to_string(),
                temperature_c: 21.4,
                humidity: 48.0,
                pm2_5: 12,
                pm1_0: 9,
                pm10: 15,
            }
        );
    }

    #[test]
    fn test_limit_is_inclusive() {
        let fields = decode_fields(&frame_text(800)).unwrap();
        assert_eq!(Measurement::from_fields(&fields).unwrap().pm2_5, 800);
    }

    #[test]
    fn test_implausible_pm2_5_is_fault() {
        let fields = decode_fields(&frame_text(801)).unwrap();
        assert!(matches!(
            Measurement::from_fields(&fields),
            Err(ProtocolError::SensorFault(801))
        ));
    }

    #[test]
    fn test_wrong_field_count() {
        let mut fields = decode_fields(&frame_text(12)).unwrap();
        fields.remove("tvoc");
        match Measurement::from_fields(&fields) {
            Err(ProtocolError::MalformedResponse { reason, .. }) => {
                assert_eq!(reason, "expected 16 fields, got 15")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_key_with_right_count() {
        let mut fields = decode_fields(&frame_text(12)).unwrap();
        let t = fields.remove("t").unwrap();
        fields.insert("temp".to_string(), t);
        assert!(matches!(
            Measurement::from_fields(&fields),
            Err(ProtocolError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_record_shape() {
        let fields = decode_fields(&frame_text(12)).unwrap();
        let record = Measurement::from_fields(&fields)
            .unwrap()
            .to_record("PM-Monitor", 100);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "time": "23-05-12 14:03:27",
                "model": "PM-Monitor",
                "id": 100,
                "temperature_C": 21.4,
                "humidity": 48.0,
                "pm2_5": 12,
                "pm1_0": 9,
                "pm10": 15,
            })
        );
    }
}
