//! Core data types for SerialBench-RS
//!
//! This module contains the fundamental data structures shared by the
//! connection manager, the ingestion pipelines and observers.
//!
//! # Main Types
//!
//! - [`PortName`] - Opaque identifier of a serial endpoint (e.g. `COM3`, `/dev/ttyUSB0`)
//! - [`DeviceStatus`] - Lifecycle state of a device attached to a port
//! - [`Message`] - One received chunk, indexed in arrival order
//! - [`DeviceProperties`] - Metadata reported by a device during identification
//! - [`SerialSettings`] - Line settings used when opening a port
//!
//! # Device Status
//!
//! ```text
//! Disconnected --connect--> Connected --ident line--> Identified
//!      ^                        |                         |
//!      +-------disconnect-------+-----------disconnect----+
//! ```
//!
//! `Unidentified` is reserved for observers that want to flag a device that
//! never produced an identification line; the core never assigns it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::time::Duration;

/// Default baud rate used when the caller does not pick one
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read/write timeout for an opened port
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(5000);

/// Terminator appended to every outgoing line
pub const LINE_TERMINATOR: &str = "\n";

/// Name of a serial endpoint, unique per directory and per session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortName(String);

impl PortName {
    /// Create a port name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PortName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for PortName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PortName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// No open session
    #[default]
    Disconnected,
    /// Port is open, device has not identified itself yet
    Connected,
    /// Device sent a valid identification line
    Identified,
    /// Device is flagged as not identifiable
    Unidentified,
}

impl DeviceStatus {
    /// Whether text can be sent to a device in this state
    pub fn is_sendable(&self) -> bool {
        matches!(self, DeviceStatus::Connected | DeviceStatus::Identified)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Disconnected => write!(f, "Disconnected"),
            DeviceStatus::Connected => write!(f, "Connected"),
            DeviceStatus::Identified => write!(f, "Identified"),
            DeviceStatus::Unidentified => write!(f, "Unidentified"),
        }
    }
}

/// A received chunk of text
///
/// Messages are append-only. `index` is the position in the device log at
/// insertion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Zero-based arrival index
    pub index: usize,
    /// Raw text as read from the transport
    pub text: String,
    /// Wall-clock receive time
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// Metadata reported by a device in its identification line
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub company_name: String,
    pub product_name: String,
    pub product_model: String,
    pub manufacture_date: String,
    pub product_id: String,
    pub firmware_version: String,
}

impl DeviceProperties {
    /// Number of fields in an identification line
    pub const FIELD_COUNT: usize = 6;
}

impl std::fmt::Display for DeviceProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} (id {}, fw {}, made {})",
            self.company_name,
            self.product_name,
            self.product_model,
            self.product_id,
            self.firmware_version,
            self.manufacture_date
        )
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Handshake (flow control) mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Handshake {
    #[default]
    None,
    Software,
    Hardware,
}

/// Line settings applied when a port is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub handshake: Handshake,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self::with_baud_rate(DEFAULT_BAUD_RATE)
    }
}

impl SerialSettings {
    /// Fixed 8N1 framing, no handshake, 5 s timeouts
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            handshake: Handshake::None,
            read_timeout: DEFAULT_IO_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Override both timeouts
    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }
}

impl std::fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{} baud {}{}{}", self.baud_rate, self.data_bits, parity, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_8n1() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.handshake, Handshake::None);
        assert_eq!(settings.read_timeout, Duration::from_millis(5000));
        assert_eq!(settings.write_timeout, Duration::from_millis(5000));
        assert_eq!(settings.to_string(), "9600 baud 8N1");
    }

    #[test]
    fn test_status_sendable() {
        assert!(DeviceStatus::Connected.is_sendable());
        assert!(DeviceStatus::Identified.is_sendable());
        assert!(!DeviceStatus::Disconnected.is_sendable());
        assert!(!DeviceStatus::Unidentified.is_sendable());
    }

    #[test]
    fn test_port_name_lookup_by_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(PortName::new("COM3"), 1);
        assert_eq!(map.get("COM3"), Some(&1));
        assert_eq!(PortName::from("COM3").to_string(), "COM3");
    }

    #[test]
    fn test_port_name_serializes_as_string() {
        let json = serde_json::to_string(&PortName::new("/dev/ttyACM0")).unwrap();
        assert_eq!(json, "\"/dev/ttyACM0\"");
    }
}
