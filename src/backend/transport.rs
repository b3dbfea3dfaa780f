//! Transport trait for serial port access
//!
//! This module provides the seam between the connection manager and the
//! operating system. The core only needs two things from the environment:
//! the list of currently available port names, and a way to open a port as a
//! pair of read/write halves. Real hardware goes through
//! [`SerialPortTransport`](super::serial::SerialPortTransport); tests and demo
//! runs use [`SimulatedTransport`](super::simulated::SimulatedTransport).

use crate::error::Result;
use crate::types::{PortName, SerialSettings};

/// Read half of an open port
///
/// Implementations must not block longer than the port's read timeout and
/// should return `Ok(None)` promptly when nothing is buffered, so the reader
/// loop can observe cancellation.
#[cfg_attr(test, mockall::automock)]
pub trait PortReader: Send {
    /// Read everything currently buffered by the driver
    fn read_available(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Write half of an open port
#[cfg_attr(test, mockall::automock)]
pub trait PortWriter: Send {
    /// Write `text` followed by the line terminator
    fn write_line(&mut self, text: &str) -> Result<()>;

    /// Release the OS handle
    fn close(&mut self);
}

/// An opened port, split into independent halves
pub struct PortLink {
    pub reader: Box<dyn PortReader>,
    pub writer: Box<dyn PortWriter>,
}

impl PortLink {
    pub fn new(reader: Box<dyn PortReader>, writer: Box<dyn PortWriter>) -> Self {
        Self { reader, writer }
    }
}

impl std::fmt::Debug for PortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortLink").finish_non_exhaustive()
    }
}

/// Unified interface for serial port environments
///
/// # Example
///
/// ```ignore
/// fn open_first(transport: &dyn Transport) -> Result<PortLink> {
///     let ports = transport.list_ports()?;
///     transport.open(&ports[0], &SerialSettings::default())
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Sample the names of the ports currently present
    fn list_ports(&self) -> Result<Vec<PortName>>;

    /// Open a port with the given line settings
    fn open(&self, port: &PortName, settings: &SerialSettings) -> Result<PortLink>;
}
