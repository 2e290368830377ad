//! Probe channels backed by the `serialport` crate.

use {
    crate::{
        error::Result,
        port::{Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::trace,
    serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType},
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// An open CDC-ACM endpoint of the debug probe.
///
/// The handle is released by [`Port::close`] or on drop; I/O after closing
/// fails with [`io::ErrorKind::NotConnected`].
pub struct NativePort {
    handle: Option<Box<dyn SerialPort>>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open the endpoint described by `config` as 8N1 without flow control.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        trace!("Opening {} (timeout {:?})", config.port_name, config.timeout);
        let handle = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        Ok(Self {
            handle: Some(handle),
            name: config.port_name.clone(),
            timeout: config.timeout,
        })
    }

    fn handle(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel is closed"))
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.handle()?.set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_input(&mut self) -> Result<()> {
        self.handle()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if self.handle.take().is_some() {
            trace!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle()?.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle()?.flush()
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = Self {
            name: info.port_name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        if let SerialPortType::UsbPort(usb) = info.port_type {
            port.vid = Some(usb.vid);
            port.pid = Some(usb.pid);
            port.manufacturer = usb.manufacturer;
            port.product = usb.product;
            port.serial_number = usb.serial_number;
        }
        port
    }
}

/// Lists the serial ports known to the OS.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = serialport::available_ports()?
            .into_iter()
            .map(PortInfo::from)
            .collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_list_ports_without_hardware() {
        // Enumeration may legitimately fail in sandboxes; it must not panic
        if let Ok(ports) = NativePortEnumerator::list_ports() {
            assert!(ports.windows(2).all(|w| w[0].name <= w[1].name));
        }
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/does-not-exist-escprov", 115_200)
            .with_timeout(Duration::from_millis(10));
        assert!(NativePort::open(&config).is_err());
    }

    #[test]
    fn test_usb_metadata_is_kept() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyACM1".into(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x1d50,
                pid: 0x6018,
                serial_number: Some("7BB180B4".into()),
                manufacturer: Some("Black Magic Debug".into()),
                product: Some("Black Magic Probe".into()),
            }),
        };
        let port = PortInfo::from(info);
        assert_eq!(port.vid, Some(0x1d50));
        assert_eq!(port.pid, Some(0x6018));
        assert_eq!(port.product.as_deref(), Some("Black Magic Probe"));
    }

    #[test]
    fn test_non_usb_port_has_no_ids() {
        let port = PortInfo::from(SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::Unknown,
        });
        assert_eq!(port.name, "/dev/ttyS0");
        assert!(port.vid.is_none() && port.product.is_none());
    }
}
