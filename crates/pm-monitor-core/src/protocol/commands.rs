//! Protocol commands
//!
//! Defines the commands understood by the PM detector firmware. Every command
//! is a single line of flat JSON-like text, e.g. `{"fun":"05","flag":"1"}`.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Clock format expected by function `03` (YY-MM-DD hh:mm:ss)
pub const CLOCK_FORMAT: &str = "%y-%m-%d %H:%M:%S";

/// Two-digit function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCode {
    /// Set the push interval ("01")
    SetSendInterval,
    /// Set the internal storage interval ("02")
    SetStoreInterval,
    /// Set the device clock ("03")
    SetClock,
    /// Start or stop pushing measurements ("05")
    Streaming,
    /// Dump the current parameters ("80")
    DumpParameters,
}

impl FunctionCode {
    /// Wire representation, always two digits
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionCode::SetSendInterval => "01",
            FunctionCode::SetStoreInterval => "02",
            FunctionCode::SetClock => "03",
            FunctionCode::Streaming => "05",
            FunctionCode::DumpParameters => "80",
        }
    }

    /// Numeric value, used to compare against `res` echoes
    pub fn number(&self) -> u8 {
        match self {
            FunctionCode::SetSendInterval => 1,
            FunctionCode::SetStoreInterval => 2,
            FunctionCode::SetClock => 3,
            FunctionCode::Streaming => 5,
            FunctionCode::DumpParameters => 80,
        }
    }

    /// Check whether a `res` value echoes this code.
    /// The firmware drops the leading zero (`"5"` for `"05"`).
    pub fn matches(&self, res: &str) -> bool {
        res.trim().parse::<u8>().map_or(false, |n| n == self.number())
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A send or store interval in seconds, always exactly three digits on the wire.
///
/// `000` asks the device for a single measurement per start, and is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval(u16);

impl Interval {
    /// Largest representable interval
    pub const MAX: u16 = 999;

    /// Create from seconds
    pub fn from_secs(secs: u16) -> Result<Self, ProtocolError> {
        if secs > Self::MAX {
            return Err(ProtocolError::InvalidArgument(format!(
                "interval {} exceeds {}",
                secs,
                Self::MAX
            )));
        }
        Ok(Self(secs))
    }

    /// Seconds
    pub fn secs(&self) -> u16 {
        self.0
    }
}

impl FromStr for Interval {
    type Err = ProtocolError;

    /// Accepts exactly three ASCII digits, "000" through "999".
    /// Shorter strings are rejected because the firmware misreads them.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidArgument(format!(
                "only strings of 3 digits between \"000\" and \"999\" are supported, got {:?}",
                s
            )));
        }
        s.parse::<u16>()
            .map(Self)
            .map_err(|e| ProtocolError::InvalidArgument(e.to_string()))
    }
}

impl TryFrom<String> for Interval {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// A command ready to be written to the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Function code, always the first field
    pub code: FunctionCode,
    /// Parameter fields in wire order
    pub fields: Vec<(&'static str, String)>,
}

impl Command {
    /// Create a command with no parameters
    pub fn new(code: FunctionCode) -> Self {
        Self {
            code,
            fields: Vec::new(),
        }
    }

    /// Append a parameter field
    pub fn field(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    pub fn set_send_interval(interval: Interval) -> Self {
        Self::new(FunctionCode::SetSendInterval).field("sendtime", interval.to_string())
    }

    pub fn set_store_interval(interval: Interval) -> Self {
        Self::new(FunctionCode::SetStoreInterval).field("storetime", interval.to_string())
    }

    pub fn set_clock(time: NaiveDateTime) -> Self {
        Self::new(FunctionCode::SetClock).field("clock", time.format(CLOCK_FORMAT).to_string())
    }

    pub fn start_streaming() -> Self {
        Self::new(FunctionCode::Streaming).field("flag", "1")
    }

    pub fn stop_streaming() -> Self {
        Self::new(FunctionCode::Streaming).field("flag", "0")
    }

    pub fn dump_parameters() -> Self {
        Self::new(FunctionCode::DumpParameters)
    }

    /// Render the command as one line of text, newline included.
    /// Values are plain ASCII so no escaping is performed.
    pub fn to_line(&self) -> String {
        let mut line = format!("{{\"fun\":\"{}\"", self.code);
        for (key, value) in &self.fields {
            line.push_str(&format!(",\"{}\":\"{}\"", key, value));
        }
        line.push_str("}\n");
        line
    }

    /// Convert command to bytes for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_line().into_bytes()
    }
}
