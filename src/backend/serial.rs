//! Hardware transport backed by the `serialport` crate

use super::transport::{PortLink, PortReader, PortWriter, Transport};
use crate::error::{Result, SerialBenchError};
use crate::types::{Handshake, Parity, PortName, SerialSettings, StopBits, LINE_TERMINATOR};
use std::io::{Read, Write};

/// Transport for real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortTransport;

impl SerialPortTransport {
    pub fn new() -> Self {
        Self
    }
}

fn data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<Handshake> for serialport::FlowControl {
    fn from(handshake: Handshake) -> Self {
        match handshake {
            Handshake::None => serialport::FlowControl::None,
            Handshake::Software => serialport::FlowControl::Software,
            Handshake::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

impl Transport for SerialPortTransport {
    fn list_ports(&self) -> Result<Vec<PortName>> {
        let ports = serialport::available_ports()
            .map_err(|e| SerialBenchError::transport("<enumerate>", e.description))?;

        Ok(ports
            .into_iter()
            // On macOS only the cu.* (calling unit) nodes are usable without carrier detect
            .filter(|_p| {
                #[cfg(target_os = "macos")]
                {
                    !_p.port_name.starts_with("/dev/tty.")
                }
                #[cfg(not(target_os = "macos"))]
                {
                    true
                }
            })
            .map(|p| PortName::new(p.port_name))
            .collect())
    }

    fn open(&self, port: &PortName, settings: &SerialSettings) -> Result<PortLink> {
        // serialport has a single timeout for both directions
        let timeout = settings.read_timeout.max(settings.write_timeout);

        let handle = serialport::new(port.as_str(), settings.baud_rate)
            .data_bits(data_bits(settings.data_bits))
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(settings.handshake.into())
            .timeout(timeout)
            .open()
            .map_err(|e| SerialBenchError::from_serialport(port.as_str(), e))?;

        let read_handle = handle
            .try_clone()
            .map_err(|e| SerialBenchError::from_serialport(port.as_str(), e))?;

        tracing::debug!("Opened {} ({})", port, settings);

        Ok(PortLink::new(
            Box::new(SerialReader {
                port: port.clone(),
                handle: read_handle,
            }),
            Box::new(SerialWriter {
                port: port.clone(),
                handle: Some(handle),
            }),
        ))
    }
}

struct SerialReader {
    port: PortName,
    handle: Box<dyn serialport::SerialPort>,
}

impl PortReader for SerialReader {
    fn read_available(&mut self) -> Result<Option<Vec<u8>>> {
        let pending = self
            .handle
            .bytes_to_read()
            .map_err(|e| SerialBenchError::from_serialport(self.port.as_str(), e))?;
        if pending == 0 {
            return Ok(None);
        }

        let mut buf = vec![0u8; pending as usize];
        match self.handle.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(SerialBenchError::transport(self.port.as_str(), e)),
        }
    }
}

struct SerialWriter {
    port: PortName,
    handle: Option<Box<dyn serialport::SerialPort>>,
}

impl PortWriter for SerialWriter {
    fn write_line(&mut self, text: &str) -> Result<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| SerialBenchError::NotConnected(self.port.to_string()))?;

        handle
            .write_all(text.as_bytes())
            .and_then(|_| handle.write_all(LINE_TERMINATOR.as_bytes()))
            .and_then(|_| handle.flush())
            .map_err(|e| SerialBenchError::transport(self.port.as_str(), e))
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            tracing::debug!("Closed {}", self.port);
        }
    }
}
