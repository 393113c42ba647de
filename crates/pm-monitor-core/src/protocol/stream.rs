use serialport::SerialPort;
use std::io::{self, Read, Write};

/// Byte-level access to the detector link.
///
/// Readers poll `bytes_to_read` before reading. A read that still times out
/// yields `ErrorKind::TimedOut` (or `Ok(0)`) and is not a fault.
pub trait Transport: Read + Write + Send {
    /// Get number of bytes available to read
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Get number of bytes still waiting to be transmitted
    fn bytes_to_write(&mut self) -> io::Result<u32>;

    /// Discard everything received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Discard everything written but not yet transmitted
    fn clear_output_buffer(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        (**self).bytes_to_read()
    }

    fn bytes_to_write(&mut self) -> io::Result<u32> {
        (**self).bytes_to_write()
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        (**self).clear_input_buffer()
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        (**self).clear_output_buffer()
    }
}

/// Serial port wrapper implementing Transport
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Name of the underlying port, if the OS reports one
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialChannel {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::from)
    }

    fn bytes_to_write(&mut self) -> io::Result<u32> {
        self.port.bytes_to_write().map_err(io::Error::from)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(io::Error::from)
    }
}
