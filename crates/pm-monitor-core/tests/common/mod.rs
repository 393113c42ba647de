//! Scripted stand-in for the detector's serial link

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pm_monitor_core::device::{DeviceDriver, DriverConfig, ProtocolTiming};
use pm_monitor_core::protocol::Transport;

pub const START: &str = "{\"fun\":\"05\",\"flag\":\"1\"}";
pub const STOP: &str = "{\"fun\":\"05\",\"flag\":\"0\"}";
pub const DUMP: &str = "{\"fun\":\"80\"}";
pub const SET_SEND: &str = "\"fun\":\"01\"";
pub const SET_STORE: &str = "\"fun\":\"02\"";
pub const SET_CLOCK: &str = "\"fun\":\"03\"";

pub const START_ACK: &str = "{\"res\":\"5\"}";

/// Parameter report as the device sends it, trailing comma included
pub fn report(send_flag: &str, send: &str, store: &str) -> String {
    format!(
        "{{\"res\":\"80\",\"SendInteralFlag\":\"{}\",\"SendInteralTime\":\"{}\",\"StoreInteralTime\":\"{}\",\"WritePoint\":\"000123\",\"ReadPoint\":\"000100\",}}",
        send_flag, send, store
    )
}

/// Sixteen-field measurement frame with the given pm2.5 value
pub fn measurement(pm2_5: u32) -> String {
    format!(
        "{{\"y\":\"23\",\"m\":\"05\",\"d\":\"12\",\"h\":\"14\",\"min\":\"03\",\"sec\":\"27\",\
         \"t\":\"21.4\",\"r\":\"48\",\"cpm2.5\":\"{}\",\"cpm1.0\":\"9\",\"cpm10\":\"15\",\
         \"pm2.5\":\"0\",\"pm1.0\":\"0\",\"pm10\":\"0\",\"hcho\":\"0\",\"tvoc\":\"0\"}}",
        pm2_5
    )
}

#[derive(Default)]
pub struct LinkState {
    /// Bytes waiting to be read
    pub input: VecDeque<u8>,
    /// Partial line being written
    line: String,
    /// Complete lines written, newline stripped
    pub writes: Vec<String>,
    /// Replies queued per command substring, answered in order
    replies: Vec<(String, VecDeque<String>)>,
    pub input_clears: usize,
    pub output_clears: usize,
    /// Every read and write fails with this once set
    pub fail_with: Option<ErrorKind>,
}

impl LinkState {
    fn on_line(&mut self, line: String) {
        let reply = self
            .replies
            .iter_mut()
            .find(|(key, queue)| line.contains(key.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());
        if let Some(reply) = reply {
            self.input.extend(reply.bytes());
        }
        self.writes.push(line);
    }
}

/// Cloneable handle to a scripted link. Clones share state, so a test can keep
/// one while the driver owns another.
#[derive(Clone, Default)]
pub struct SimulatedLink {
    state: Arc<Mutex<LinkState>>,
}

impl SimulatedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next line containing `command` with `reply`
    pub fn reply(self, command: &str, reply: impl Into<String>) -> Self {
        {
            let mut state = self.state();
            let reply = reply.into();
            match state.replies.iter_mut().find(|(key, _)| key == command) {
                Some((_, queue)) => queue.push_back(reply),
                None => state
                    .replies
                    .push((command.to_string(), VecDeque::from([reply]))),
            }
        }
        self
    }

    /// Put bytes on the wire without any command
    pub fn preload(self, text: &str) -> Self {
        self.state().input.extend(text.bytes());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap()
    }

    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    pub fn fail_with(&self, kind: ErrorKind) {
        self.state().fail_with = Some(kind);
    }
}

impl Read for SimulatedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if let Some(kind) = state.fail_with {
            return Err(io::Error::from(kind));
        }
        match state.input.pop_front() {
            Some(b) if !buf.is_empty() => {
                buf[0] = b;
                Ok(1)
            }
            Some(b) => {
                state.input.push_front(b);
                Ok(0)
            }
            None => Err(io::Error::from(ErrorKind::TimedOut)),
        }
    }
}

impl Write for SimulatedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if let Some(kind) = state.fail_with {
            return Err(io::Error::from(kind));
        }
        for &b in buf {
            if b == b'\n' {
                let line = std::mem::take(&mut state.line);
                state.on_line(line);
            } else {
                state.line.push(b as char);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedLink {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.state();
        if let Some(kind) = state.fail_with {
            return Err(io::Error::from(kind));
        }
        Ok(state.input.len() as u32)
    }

    fn bytes_to_write(&mut self) -> io::Result<u32> {
        Ok(0)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if let Some(kind) = state.fail_with {
            return Err(io::Error::from(kind));
        }
        state.input.clear();
        state.input_clears += 1;
        Ok(())
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if let Some(kind) = state.fail_with {
            return Err(io::Error::from(kind));
        }
        state.output_clears += 1;
        Ok(())
    }
}

/// Driver configuration with no protocol delays and a short frame timeout
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        port_name: "sim".to_string(),
        timeout: Duration::from_millis(100),
        timing: ProtocolTiming::immediate(),
        ..DriverConfig::default()
    }
}

pub fn driver(link: &SimulatedLink) -> DeviceDriver<SimulatedLink> {
    DeviceDriver::new(link.clone(), &fast_config())
}
