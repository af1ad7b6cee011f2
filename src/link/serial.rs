//! USB CDC serial ports as link streams.

use std::io;
use tokio_serial::{
    DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialPortType, StopBits, UsbPortInfo,
};
use tracing::{debug, warn};

use super::{DeviceInfo, DeviceProvider, LinkError, LinkStream};

/// Lists the host's USB serial ports. With `pinned` set, only that port is
/// offered (it is listed even if enumeration does not report it).
pub struct SerialDeviceProvider {
    baud_rate: u32,
    pinned: Option<String>,
}

impl SerialDeviceProvider {
    pub fn new(baud_rate: u32, pinned: Option<String>) -> Self {
        Self { baud_rate, pinned }
    }
}

impl DeviceProvider for SerialDeviceProvider {
    fn list(&self) -> Vec<DeviceInfo> {
        let ports = match tokio_serial::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
        };

        let mut devices: Vec<DeviceInfo> = ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => Some(usb_device(&port.port_name, &usb)),
                _ => None,
            })
            .collect();

        if let Some(pinned) = &self.pinned {
            devices.retain(|d| &d.id == pinned);
            if devices.is_empty() {
                devices.push(DeviceInfo {
                    id: pinned.clone(),
                    title: pinned.clone(),
                    subtitle: "Serial port (from --port)".to_string(),
                    has_permission: true,
                });
            }
        }
        devices
    }

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn LinkStream>, LinkError> {
        debug!(port = %device.id, baud = self.baud_rate, "opening serial port");
        let mut port = tokio_serial::new(&device.id, self.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .open_native_async()
            .map_err(|e| open_error(&device.id, e))?;

        // The CDC shell only starts talking once the host raises DTR.
        if let Err(e) = port.write_data_terminal_ready(true) {
            debug!("failed to set DTR: {}", e);
        }
        if let Err(e) = port.write_request_to_send(true) {
            debug!("failed to set RTS: {}", e);
        }
        Ok(Box::new(port))
    }
}

fn usb_device(port_name: &str, usb: &UsbPortInfo) -> DeviceInfo {
    let mut subtitle = port_name.to_string();
    if let Some(product) = usb.product.as_deref().filter(|p| !p.is_empty()) {
        subtitle = format!("{} {}", product, port_name);
    }
    DeviceInfo {
        id: port_name.to_string(),
        title: format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
        subtitle,
        has_permission: true,
    }
}

fn open_error(port: &str, err: tokio_serial::Error) -> LinkError {
    match err.kind() {
        tokio_serial::ErrorKind::NoDevice => LinkError::DeviceGone(port.to_string()),
        tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => {
            LinkError::DeviceGone(port.to_string())
        }
        tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            LinkError::PermissionDenied
        }
        _ => LinkError::Open(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_device_title() {
        let usb = UsbPortInfo {
            vid: 0x1d50,
            pid: 0x6018,
            serial_number: None,
            manufacturer: None,
            product: Some("PortaPack Mayhem".to_string()),
        };
        let device = usb_device("/dev/ttyACM0", &usb);
        assert_eq!(device.title, "USB 1d50:6018");
        assert_eq!(device.subtitle, "PortaPack Mayhem /dev/ttyACM0");
        assert_eq!(device.id, "/dev/ttyACM0");
    }

    #[test]
    fn test_pinned_port_is_always_listed() {
        let provider = SerialDeviceProvider::new(115_200, Some("/dev/does-not-exist".into()));
        let devices = provider.list();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "/dev/does-not-exist");
    }

    #[test]
    fn test_open_error_mapping() {
        let gone = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "gone");
        assert!(matches!(open_error("p", gone), LinkError::DeviceGone(_)));
        let denied = tokio_serial::Error::new(
            tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "denied",
        );
        assert!(matches!(open_error("p", denied), LinkError::PermissionDenied));
        let busy = tokio_serial::Error::new(tokio_serial::ErrorKind::Unknown, "Device or resource busy");
        let err = open_error("p", busy);
        assert!(err.is_busy());
    }
}
