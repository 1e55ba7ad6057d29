//! Serial port enumeration

use serialport::{available_ports, SerialPortType};
use tracing::info;

use crate::error::CommError;

/// A serial port that could host a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            _ => Self {
                port: name,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
            },
        }
    }

    /// One-line description for listings
    pub fn describe(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => format!(
                "{} [{:04x}:{:04x}] {}",
                self.port,
                vid,
                pid,
                self.product.as_deref().unwrap_or("USB serial")
            ),
            _ => self.port.clone(),
        }
    }
}

/// Enumerate serial ports, skipping Bluetooth pseudo-ports
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, CommError> {
    let ports = available_ports().map_err(|e| CommError::Enumeration(e.to_string()))?;

    let result: Vec<_> = ports
        .into_iter()
        .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
        .filter(|p| !p.port.contains("Bluetooth"))
        .collect();

    info!("Found {} serial port(s)", result.len());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_port_info_from_usb() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x2341,
            pid: 0x0043,
            serial_number: None,
            manufacturer: Some("Arduino".to_string()),
            product: Some("Uno".to_string()),
        });

        let info = SerialPortInfo::from_serialport("/dev/ttyACM0".to_string(), &usb);
        assert_eq!(info.vid, Some(0x2341));
        assert_eq!(info.describe(), "/dev/ttyACM0 [2341:0043] Uno");
    }

    #[test]
    fn test_port_info_non_usb() {
        let info = SerialPortInfo::from_serialport("COM1".to_string(), &SerialPortType::Unknown);
        assert_eq!(info.vid, None);
        assert_eq!(info.describe(), "COM1");
    }
}
