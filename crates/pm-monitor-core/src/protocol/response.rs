//! Response decoding
//!
//! Every device message is a flat map of string keys to (mostly string)
//! values. Decoding is delegated to `serde_json`; this module turns the map
//! into typed responses and checks them against the request that caused them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use super::{FunctionCode, ProtocolError, RawFrame, DESYNC_THRESHOLD};

/// Decoded flat message. Numeric values are kept in their textual form.
pub type FieldMap = BTreeMap<String, String>;

/// Acknowledgment of a command, `{"res":"NN", ...}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    /// The request code this acknowledgment was matched against
    pub code: FunctionCode,
    /// All decoded fields, `res` included
    pub fields: FieldMap,
}

/// Current device configuration as reported by function `80`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterReport {
    /// Whether the device is pushing measurements
    pub send_flag: bool,
    /// Push interval in seconds
    pub send_interval: u16,
    /// Storage interval in seconds
    pub store_interval: u16,
    /// Write offset into the history buffer. Opaque, diagnostics only.
    pub write_point: String,
    /// Read offset into the history buffer. Opaque, diagnostics only.
    pub read_point: String,
    /// Every field of the report, including ones not modelled above
    pub fields: FieldMap,
}

impl ParameterReport {
    /// Build a report from decoded fields, failing when a required key is
    /// missing or unreadable.
    pub fn from_fields(fields: FieldMap) -> Result<Self, ProtocolError> {
        let send_flag = match field(&fields, "SendInteralFlag")? {
            "1" => true,
            "0" => false,
            other => {
                return Err(ProtocolError::malformed(
                    format!("SendInteralFlag {:?} is neither 0 nor 1", other),
                    format!("{:?}", fields),
                ))
            }
        };
        let send_interval = parse_field(&fields, "SendInteralTime")?;
        let store_interval = parse_field(&fields, "StoreInteralTime")?;
        let write_point = field(&fields, "WritePoint")?.to_string();
        let read_point = field(&fields, "ReadPoint")?.to_string();

        Ok(Self {
            send_flag,
            send_interval,
            store_interval,
            write_point,
            read_point,
            fields,
        })
    }
}

/// Look up a required field, trimmed
pub(crate) fn field<'a>(fields: &'a FieldMap, key: &str) -> Result<&'a str, ProtocolError> {
    fields
        .get(key)
        .map(|v| v.trim())
        .ok_or_else(|| ProtocolError::malformed(format!("missing {}", key), format!("{:?}", fields)))
}

/// Look up and parse a required field
pub(crate) fn parse_field<T>(fields: &FieldMap, key: &str) -> Result<T, ProtocolError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    field(fields, key)?
        .parse::<T>()
        .map_err(|e| ProtocolError::malformed(format!("{}: {}", key, e), format!("{:?}", fields)))
}

/// A validated response to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Acknowledgment(Acknowledgment),
    Parameters(ParameterReport),
}

/// Decode a frame into its fields
pub fn decode_fields(text: &str) -> Result<FieldMap, ProtocolError> {
    let map: serde_json::Map<String, Value> =
        serde_json::from_str(text).map_err(|e| ProtocolError::malformed(e.to_string(), text))?;

    let mut fields = FieldMap::new();
    for (key, value) in map {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            Value::Array(_) | Value::Object(_) => {
                return Err(ProtocolError::malformed(format!("nested value at {}", key), text))
            }
        };
        fields.insert(key, value);
    }
    Ok(fields)
}

/// The parameter report ends in `,}`. Remove exactly that one comma.
fn strip_dangling_separator(text: &str) -> std::borrow::Cow<'_, str> {
    match text.strip_suffix(",}") {
        Some(body) => format!("{}}}", body).into(),
        None => text.into(),
    }
}

/// A long frame where a short acknowledgment belonged means the link is out of
/// step; anything shorter is merely malformed.
fn desync_or(frame: &RawFrame, err: ProtocolError) -> ProtocolError {
    if frame.len() >= DESYNC_THRESHOLD {
        ProtocolError::DesyncSuspected {
            raw: frame.to_string(),
            length: frame.len(),
        }
    } else {
        err
    }
}

/// Parse an acknowledgment and check it echoes `expected`
pub fn parse_acknowledgment(frame: &RawFrame, expected: FunctionCode) -> Result<Acknowledgment, ProtocolError> {
    let fields = decode_fields(frame.as_str()).map_err(|e| desync_or(frame, e))?;
    let res = match fields.get("res") {
        Some(res) => res,
        None => {
            return Err(desync_or(
                frame,
                ProtocolError::malformed("missing res", frame.as_str()),
            ))
        }
    };
    if !expected.matches(res) {
        return Err(ProtocolError::ProtocolMismatch {
            expected,
            actual: res.clone(),
        });
    }
    Ok(Acknowledgment {
        code: expected,
        fields,
    })
}

/// Parse the response to a parameter dump.
///
/// A report that arrives without its usual trailing `,}` comma is accepted
/// as-is rather than rejected.
pub fn parse_parameter_report(frame: &RawFrame) -> Result<ParameterReport, ProtocolError> {
    let text = strip_dangling_separator(frame.as_str());
    let fields = decode_fields(&text)?;
    match fields.get("res") {
        Some(res) if FunctionCode::DumpParameters.matches(res) => {}
        Some(res) => {
            return Err(ProtocolError::ProtocolMismatch {
                expected: FunctionCode::DumpParameters,
                actual: res.clone(),
            })
        }
        None => return Err(ProtocolError::malformed("missing res", frame.as_str())),
    }
    ParameterReport::from_fields(fields)
}

/// Parse `frame` as the answer to a command with function code `expected`
pub fn parse_and_validate(frame: &RawFrame, expected: FunctionCode) -> Result<Response, ProtocolError> {
    match expected {
        FunctionCode::DumpParameters => parse_parameter_report(frame).map(Response::Parameters),
        _ => parse_acknowledgment(frame, expected).map(Response::Acknowledgment),
    }
}

/// Whether `fields` is a bare start-streaming acknowledgment, which shows up
/// in place of a measurement when the link is a turn behind.
pub fn is_stray_start_ack(fields: &FieldMap) -> bool {
    fields.len() == 1 && fields.get("res").is_some_and(|res| FunctionCode::Streaming.matches(res))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const REPORT: &str = "{\"res\":\"80\",\"SendInteralFlag\":\"0\",\"SendInteralTime\":\"005\",\"StoreInteralTime\":\"060\",\"WritePoint\":\"000123\",\"ReadPoint\":\"000100\",}";

    #[test]
    fn test_ack_matches_without_leading_zero() {
        let frame = RawFrame::new("{\"res\":\"5\"}");
        let ack = parse_acknowledgment(&frame, FunctionCode::Streaming).unwrap();
        assert_eq!(ack.code, FunctionCode::Streaming);
        assert_eq!(ack.fields.get("res").map(String::as_str), Some("5"));
    }

    #[test]
    fn test_ack_mismatch() {
        let frame = RawFrame::new("{\"res\":\"3\"}");
        match parse_and_validate(&frame, FunctionCode::Streaming) {
            Err(ProtocolError::ProtocolMismatch { expected, actual }) => {
                assert_eq!(expected, FunctionCode::Streaming);
                assert_eq!(actual, "3");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_long_unexpected_frame_is_desync() {
        let frame = RawFrame::new("{\"y\":\"23\",\"m\":\"05\",\"d\":\"12\"}");
        match parse_acknowledgment(&frame, FunctionCode::Streaming) {
            Err(ProtocolError::DesyncSuspected { length, .. }) => assert_eq!(length, frame.len()),
            other => panic!("unexpected: {:?}", other),
        }

        let garbage = RawFrame::new("\"res\":\"5\"}{\"y\":\"23\",\"m\":\"05\"}");
        assert!(matches!(
            parse_acknowledgment(&garbage, FunctionCode::Streaming),
            Err(ProtocolError::DesyncSuspected { .. })
        ));
    }

    #[test]
    fn test_short_unexpected_frame_is_malformed() {
        let frame = RawFrame::new("\"5\"}");
        assert!(matches!(
            parse_acknowledgment(&frame, FunctionCode::Streaming),
            Err(ProtocolError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_parameter_report_strips_one_separator() {
        let report = parse_parameter_report(&RawFrame::new(REPORT)).unwrap();
        assert!(!report.send_flag);
        assert_eq!(report.send_interval, 5);
        assert_eq!(report.store_interval, 60);
        assert_eq!(report.write_point, "000123");
        assert_eq!(report.read_point, "000100");
        assert_eq!(report.fields.len(), 6);
    }

    #[test]
    fn test_parameter_report_without_separator() {
        let text = REPORT.replace(",}", "}");
        let report = parse_parameter_report(&RawFrame::new(text)).unwrap();
        assert_eq!(report.send_interval, 5);
    }

    #[test]
    fn test_only_one_separator_is_repaired() {
        let text = REPORT.replace(",}", ",,}");
        assert!(matches!(
            parse_parameter_report(&RawFrame::new(text)),
            Err(ProtocolError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_parameter_report_missing_field() {
        let text = REPORT.replace("\"ReadPoint\":\"000100\",", "");
        match parse_parameter_report(&RawFrame::new(text)) {
            Err(ProtocolError::MalformedResponse { reason, .. }) => {
                assert_eq!(reason, "missing ReadPoint")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parameter_report_wrong_code() {
        let text = REPORT.replace("\"res\":\"80\"", "\"res\":\"5\"");
        assert!(matches!(
            parse_and_validate(&RawFrame::new(text), FunctionCode::DumpParameters),
            Err(ProtocolError::ProtocolMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_keeps_numbers_as_text() {
        let fields = decode_fields("{\"t\":21.5,\"r\":\"40\"}").unwrap();
        assert_eq!(fields["t"], "21.5");
        assert_eq!(fields["r"], "40");
        assert!(decode_fields("{\"a\":{\"b\":1}}").is_err());
    }

    #[test]
    fn test_stray_start_ack() {
        assert!(is_stray_start_ack(&decode_fields("{\"res\":\"5\"}").unwrap()));
        assert!(!is_stray_start_ack(&decode_fields("{\"res\":\"3\"}").unwrap()));
        assert!(!is_stray_start_ack(
            &decode_fields("{\"res\":\"5\",\"x\":\"1\"}").unwrap()
        ));
    }
}
