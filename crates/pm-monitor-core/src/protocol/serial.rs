//! Serial port handling
//!
//! Opens and configures the detector's USB-serial adapter.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE, PORT_READ_TIMEOUT_MS};

/// Substrings identifying the detector's USB bridge
const BRIDGE_MARKERS: [&str; 2] = ["CH340", "USB Serial"];

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
            ),
            _ => (None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
        }
    }
}

impl PortInfo {
    /// Whether this port looks like the detector's CH340 bridge
    pub fn is_ch340(&self) -> bool {
        [&self.product, &self.manufacturer]
            .into_iter()
            .flatten()
            .any(|text| BRIDGE_MARKERS.iter().any(|marker| text.contains(marker)))
    }
}

/// List all available serial ports, sorted by name
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports
}

/// Pick the single CH340 bridge out of `ports`
fn select_ch340(ports: &[PortInfo]) -> Result<String, ProtocolError> {
    let matches: Vec<&PortInfo> = ports.iter().filter(|p| p.is_ch340()).collect();
    match matches.as_slice() {
        [only] => Ok(only.name.clone()),
        [] => Err(ProtocolError::PortNotFound(
            "PM Monitor is not connected, no CH340 USB-serial device found".to_string(),
        )),
        many => Err(ProtocolError::PortNotFound(format!(
            "multiple CH340 devices connected, cannot choose between {}",
            many.iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Find the port of the detector. Assumes exactly one CH340 device is present.
pub fn find_ch340_port() -> Result<String, ProtocolError> {
    let name = select_ch340(&list_ports())?;
    tracing::info!(port = %name, "found CH340 serial bridge");
    Ok(name)
}

/// Open a serial port with the detector's link settings
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    let mut port = serialport::new(name, baud)
        .timeout(Duration::from_millis(PORT_READ_TIMEOUT_MS))
        .open()
        .map_err(|e| ProtocolError::SerialError(format!("{}: {}", name, e)))?;
    configure_port(port.as_mut())?;
    tracing::debug!(port = %name, baud, "serial port opened");
    Ok(port)
}

/// Configure a serial port for the detector: 8 data bits, no parity, 1 stop bit
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, product: Option<&str>, manufacturer: Option<&str>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: Some(0x1a86),
            pid: Some(0x7523),
            manufacturer: manufacturer.map(str::to_string),
            product: product.map(str::to_string),
        }
    }

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_select_single_bridge() {
        let ports = vec![
            port("/dev/ttyACM0", Some("Arduino Uno"), None),
            port("/dev/ttyUSB0", Some("USB Serial"), Some("QinHeng Electronics")),
        ];
        assert_eq!(select_ch340(&ports).unwrap(), "/dev/ttyUSB0");

        let ports = vec![port("COM4", None, Some("wch.cn CH340"))];
        assert_eq!(select_ch340(&ports).unwrap(), "COM4");
    }

    #[test]
    fn test_select_rejects_none_or_many() {
        let none = vec![port("/dev/ttyACM0", Some("Arduino Uno"), None)];
        assert!(matches!(select_ch340(&none), Err(ProtocolError::PortNotFound(_))));

        let many = vec![
            port("/dev/ttyUSB0", Some("USB Serial"), None),
            port("/dev/ttyUSB1", Some("CH340"), None),
        ];
        match select_ch340(&many) {
            Err(ProtocolError::PortNotFound(msg)) => {
                assert!(msg.contains("/dev/ttyUSB0"));
                assert!(msg.contains("/dev/ttyUSB1"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
