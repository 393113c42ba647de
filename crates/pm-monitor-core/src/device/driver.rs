//! Device driver
//!
//! Owns the link to the detector and runs every exchange with it. Each
//! operation is one strictly ordered turn: send, settle, read until `}`,
//! validate. The device cannot cope with overlapping turns, so the driver takes
//! `&mut self` everywhere and is never shared.

use std::io::Write;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};

use super::measurement::{Measurement, MEASUREMENT_FIELD_COUNT};
use super::state::{DeviceState, StreamingState};
use crate::protocol::frame::pending_bytes;
use crate::protocol::response::{decode_fields, is_stray_start_ack};
use crate::protocol::{
    find_ch340_port, open_port, parse_and_validate, Command, FrameReader, Interval, ParameterReport,
    PendingBytes, ProtocolError, RawFrame, Response, Result, SerialChannel, Transport,
    DEFAULT_BAUD_RATE, DEFAULT_OPERATION_TIMEOUT_SECS,
};

/// Delays the detector needs between the steps of a turn.
///
/// These are part of the protocol: shorter values let one command's response
/// bleed into the next. Only simulated links should use [`ProtocolTiming::immediate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTiming {
    /// Wait between sending a command and reading its answer
    pub settle: Duration,
    /// Stop sequence: after the stop command is written
    pub stop_after_write: Duration,
    /// Stop sequence: after the output buffer is cleared
    pub stop_after_output_clear: Duration,
    /// Stop sequence: after the input buffer is cleared
    pub stop_after_input_clear: Duration,
    /// Desync recovery: before and after the input buffer is cleared
    pub drain_settle: Duration,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            stop_after_write: Duration::from_millis(400),
            stop_after_output_clear: Duration::from_millis(400),
            stop_after_input_clear: Duration::from_millis(200),
            drain_settle: Duration::from_millis(500),
        }
    }
}

impl ProtocolTiming {
    /// No delays at all, for scripted links
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            stop_after_write: Duration::ZERO,
            stop_after_output_clear: Duration::ZERO,
            stop_after_input_clear: Duration::ZERO,
            drain_settle: Duration::ZERO,
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Serial port name. Empty means: find the CH340 bridge.
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Wall-clock limit for one read-until-terminator
    pub timeout: Duration,
    /// Inter-step delays
    pub timing: ProtocolTiming,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            timing: ProtocolTiming::default(),
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

/// Driver for one PM detector
pub struct DeviceDriver<T: Transport = SerialChannel> {
    /// Link to the device
    transport: T,
    /// Cached configuration and streaming flag
    state: DeviceState,
    /// Reads brace-terminated frames
    reader: FrameReader,
    /// Inter-step delays
    timing: ProtocolTiming,
}

impl DeviceDriver<SerialChannel> {
    /// Open the configured serial port, or the only CH340 bridge when no
    /// port is configured
    pub fn open(config: &DriverConfig) -> Result<Self> {
        let port_name = if config.port_name.is_empty() {
            find_ch340_port()?
        } else {
            config.port_name.clone()
        };
        let port = open_port(&port_name, Some(config.baud_rate))?;
        tracing::info!(port = %port_name, baud = config.baud_rate, "connected to PM detector");
        Ok(Self::new(SerialChannel::new(port), config))
    }
}

impl<T: Transport> DeviceDriver<T> {
    /// Wrap an already open transport
    pub fn new(transport: T, config: &DriverConfig) -> Self {
        Self {
            transport,
            state: DeviceState::new(),
            reader: FrameReader::new(config.timeout),
            timing: config.timing,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Current position in the streaming state machine
    pub fn state(&self) -> StreamingState {
        self.state.streaming()
    }

    /// Cached configuration, without triggering a fetch
    pub fn device_state(&self) -> &DeviceState {
        &self.state
    }

    /// Bytes waiting in each direction
    pub fn pending_bytes(&mut self) -> PendingBytes {
        pending_bytes(&mut self.transport)
    }

    /// Write one command line
    fn send(&mut self, command: &Command) -> Result<()> {
        let line = command.to_line();
        tracing::debug!(command = %line.trim_end(), "sending");
        self.transport.write_all(line.as_bytes())?;
        self.transport.flush()?;
        Ok(())
    }

    /// Send a command and read the frame that answers it
    fn exchange(&mut self, command: &Command) -> Result<RawFrame> {
        self.send(command)?;
        pause(self.timing.settle);
        self.reader.read_frame(&mut self.transport)
    }

    /// Send a command and validate its answer. A desynchronised answer
    /// triggers a drain before the error is returned.
    fn request(&mut self, command: &Command) -> Result<Response> {
        let frame = self.exchange(command)?;
        match parse_and_validate(&frame, command.code) {
            Err(e @ ProtocolError::DesyncSuspected { .. }) => {
                tracing::warn!(error = %e, "response out of step, draining link");
                if let Err(drain_err) = self.drain_input() {
                    tracing::warn!(error = %drain_err, "drain failed");
                }
                Err(e)
            }
            other => other,
        }
    }

    /// Discard whatever the link still holds from earlier turns
    pub fn drain_input(&mut self) -> Result<()> {
        pause(self.timing.drain_settle);
        self.transport.clear_input_buffer()?;
        pause(self.timing.drain_settle);
        Ok(())
    }

    /// Ask the device to push measurements.
    ///
    /// Does nothing when streaming is already acknowledged.
    pub fn start_streaming(&mut self) -> Result<()> {
        if self.state.streaming() == StreamingState::Streaming {
            tracing::debug!("already streaming");
            return Ok(());
        }
        match self.request(&Command::start_streaming()) {
            Ok(_) => {
                self.state.set_streaming(StreamingState::Streaming);
                tracing::info!("streaming started");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start streaming");
                Err(e)
            }
        }
    }

    /// Ask the device to stop pushing measurements.
    ///
    /// The device never acknowledges this, so the state moves to `Idle`
    /// unconditionally. Both buffers are then cleared with pauses in between
    /// so that bytes in flight cannot reach the next command's read.
    pub fn stop_streaming(&mut self) -> Result<()> {
        let sent = self.send(&Command::stop_streaming());
        self.state.set_streaming(StreamingState::Idle);
        sent?;

        pause(self.timing.stop_after_write);
        self.transport.clear_output_buffer()?;
        pause(self.timing.stop_after_output_clear);
        self.transport.clear_input_buffer()?;
        pause(self.timing.stop_after_input_clear);
        tracing::debug!("streaming stopped");
        Ok(())
    }

    /// Read one measurement, starting the stream first if needed.
    pub fn read_measurement(&mut self) -> Result<Measurement> {
        if self.state.streaming() != StreamingState::Streaming {
            if let Err(e) = self.start_streaming() {
                // The device may be streaming regardless; the frame read decides.
                tracing::warn!(error = %e, "reading without a confirmed start");
            }
        }

        let frame = self.reader.read_frame(&mut self.transport)?;
        let fields = decode_fields(frame.as_str()).map_err(|e| self.with_pending(e))?;

        if fields.len() == MEASUREMENT_FIELD_COUNT {
            return Measurement::from_fields(&fields);
        }

        if is_stray_start_ack(&fields) {
            tracing::warn!(frame = %frame, "start acknowledgment in place of a measurement, draining link");
            self.drain_input()?;
            return Err(ProtocolError::DesyncSuspected {
                length: frame.len(),
                raw: frame.into_string(),
            });
        }

        Err(self.with_pending(ProtocolError::MalformedResponse {
            reason: format!(
                "expected {} fields, got {}",
                MEASUREMENT_FIELD_COUNT,
                fields.len()
            ),
            raw: frame.into_string(),
            pending_input: 0,
        }))
    }

    /// Attach the current input backlog to a malformed-response error
    fn with_pending(&mut self, err: ProtocolError) -> ProtocolError {
        match err {
            ProtocolError::MalformedResponse { reason, raw, .. } => ProtocolError::MalformedResponse {
                reason,
                raw,
                pending_input: self.transport.bytes_to_read().unwrap_or(0),
            },
            other => other,
        }
    }

    /// Fetch the device parameters and refresh the cache from them.
    ///
    /// A streaming device cannot answer, so streaming is stopped first.
    /// The cache is only touched when the whole report is valid.
    pub fn refresh_parameters(&mut self) -> Result<ParameterReport> {
        if self.state.streaming() == StreamingState::Streaming {
            self.stop_streaming()?;
        }
        let report = match self.request(&Command::dump_parameters())? {
            Response::Parameters(report) => report,
            Response::Acknowledgment(ack) => {
                return Err(ProtocolError::malformed(
                    "acknowledgment instead of parameter report",
                    format!("{:?}", ack.fields),
                ))
            }
        };
        self.state.apply_report(&report, Instant::now());
        tracing::debug!(?report, "parameters refreshed");
        Ok(report)
    }

    /// Current device parameters
    pub fn get_parameters(&mut self) -> Result<ParameterReport> {
        self.refresh_parameters()
    }

    /// Return a cached value, fetching parameters first if it is absent
    fn cached<V>(&mut self, get: impl Fn(&DeviceState) -> Option<V>) -> Result<V> {
        if let Some(value) = get(&self.state) {
            return Ok(value);
        }
        self.refresh_parameters()?;
        get(&self.state).ok_or_else(|| ProtocolError::malformed("parameter cache still empty", ""))
    }

    /// Push interval in seconds
    pub fn send_interval(&mut self) -> Result<u16> {
        self.cached(|s| s.send_interval())
    }

    /// Storage interval in seconds
    pub fn store_interval(&mut self) -> Result<u16> {
        self.cached(|s| s.store_interval())
    }

    /// History read pointer
    pub fn read_point(&mut self) -> Result<String> {
        self.cached(|s| s.read_point().map(str::to_string))
    }

    /// History write pointer, refetched when older than 30 seconds
    pub fn write_point(&mut self) -> Result<String> {
        if self.state.write_point_stale(Instant::now()) {
            self.refresh_parameters()?;
        }
        self.cached(|s| s.write_point().map(str::to_string))
    }

    /// Whether the device is streaming, asking it when unknown
    pub fn is_streaming(&mut self) -> Result<bool> {
        if self.state.streaming() == StreamingState::Unknown {
            self.refresh_parameters()?;
        }
        Ok(self.state.streaming() == StreamingState::Streaming)
    }

    /// Set the device clock to the given time
    pub fn set_clock_to(&mut self, time: NaiveDateTime) -> Result<()> {
        self.request(&Command::set_clock(time))?;
        tracing::info!(%time, "device clock set");
        Ok(())
    }

    /// Set the device clock to the local time of this machine
    pub fn set_clock(&mut self) -> Result<NaiveDateTime> {
        let now = Local::now().naive_local();
        self.set_clock_to(now)?;
        Ok(now)
    }

    /// Set the push interval from a three-digit string ("000" to "999").
    ///
    /// The value is validated before anything is sent.
    pub fn set_send_interval(&mut self, value: &str) -> Result<ParameterReport> {
        let interval: Interval = value.parse()?;
        self.write_interval(Command::set_send_interval(interval))
    }

    /// Set the storage interval from a three-digit string ("000" to "999").
    ///
    /// The value is validated before anything is sent.
    pub fn set_store_interval(&mut self, value: &str) -> Result<ParameterReport> {
        let interval: Interval = value.parse()?;
        self.write_interval(Command::set_store_interval(interval))
    }

    fn write_interval(&mut self, command: Command) -> Result<ParameterReport> {
        if self.state.streaming() == StreamingState::Streaming {
            self.stop_streaming()?;
        }
        self.request(&command)?;
        tracing::info!(command = %command.to_line().trim_end(), "interval accepted");
        self.refresh_parameters()
    }
}
