//! Frame accumulation
//!
//! The detector never announces message lengths. A message is complete when the
//! last character received is `}`, which holds only because the firmware never
//! nests objects.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use super::{PendingBytes, ProtocolError, Transport, DEFAULT_OPERATION_TIMEOUT_SECS};

/// Closing delimiter of every device message
pub const TERMINATOR: char = '}';

/// Byte the link occasionally injects in front of buffer pointers.
/// It is not part of any message.
pub const SPURIOUS_BYTE: u8 = 0xF5;

/// Sleep between empty reads so a non-blocking transport does not spin
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Text accumulated up to and including the terminating brace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    text: String,
}

impl RawFrame {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Reads one brace-terminated frame off a transport
#[derive(Debug, Clone, Copy)]
pub struct FrameReader {
    timeout: Duration,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS))
    }
}

impl FrameReader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Accumulate bytes until the last character is `}`.
    ///
    /// Polls `bytes_to_read` and reads only bytes already waiting, so the
    /// port-level read timeout never extends the deadline. Gives up with `FramingTimeout` once `timeout` has elapsed, carrying
    /// whatever was received so far.
    pub fn read_frame<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<RawFrame, ProtocolError> {
        let start = Instant::now();
        let mut text = String::new();
        let mut byte = [0u8; 1];

        while !text.ends_with(TERMINATOR) {
            let remaining = self.timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                let pending = pending_bytes(transport);
                tracing::debug!(partial = %text, %pending, "frame read timed out");
                return Err(ProtocolError::FramingTimeout {
                    partial: text,
                    pending,
                });
            }

            // Only read what has already arrived; a blocking read would hold
            // the loop for the whole port timeout, past the deadline.
            if transport.bytes_to_read()? == 0 {
                std::thread::sleep(POLL_INTERVAL.min(remaining));
                continue;
            }

            match transport.read(&mut byte) {
                Ok(0) => std::thread::sleep(POLL_INTERVAL),
                Ok(_) => match byte[0] {
                    SPURIOUS_BYTE => {
                        tracing::debug!("skipping spurious 0xf5 byte");
                    }
                    b if b.is_ascii() => text.push(b as char),
                    b => {
                        return Err(ProtocolError::Encoding {
                            byte: b,
                            partial: text,
                        })
                    }
                },
                Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(ProtocolError::Transport(e)),
            }
        }

        tracing::debug!(frame = %text, "frame received");
        Ok(RawFrame { text })
    }
}

/// Read one frame with the given timeout
pub fn read_frame<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> Result<RawFrame, ProtocolError> {
    FrameReader::new(timeout).read_frame(transport)
}

/// Snapshot of both buffer levels. Failures read as zero; the numbers are
/// only ever used in diagnostics.
pub(crate) fn pending_bytes<T: Transport + ?Sized>(transport: &mut T) -> PendingBytes {
    PendingBytes {
        input: transport.bytes_to_read().unwrap_or(0),
        output: transport.bytes_to_write().unwrap_or(0),
    }
}
