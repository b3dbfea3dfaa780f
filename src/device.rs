//! Per-port device record
//!
//! A [`Device`] is created when a port is connected and removed when it is
//! disconnected. It is shared between the port's ingestion pipeline (which
//! appends messages and runs identification) and the control path (connect,
//! disconnect, send) through a [`SharedDevice`] handle.

use crate::error::{Result, SerialBenchError};
use crate::sync;
use crate::types::{DeviceProperties, DeviceStatus, Message, PortName};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// State of one device attached to a serial port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Port the device is attached to
    pub port: PortName,
    /// Current lifecycle status
    pub status: DeviceStatus,
    /// Baud rate of the current (or last) session
    pub baud_rate: u32,
    /// Messages per second over the last completed window
    pub sampling_frequency: u32,
    /// Identification metadata, set once
    properties: Option<DeviceProperties>,
    /// Received messages in arrival order
    messages: Vec<Message>,
    /// Text the user wants to send (manual or auto-send)
    pub outgoing: String,
    /// Whether the auto-send loop is running for this device
    pub auto_send: bool,
}

impl Device {
    /// Create a disconnected device record
    pub fn new(port: impl Into<PortName>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            status: DeviceStatus::Disconnected,
            baud_rate,
            sampling_frequency: 0,
            properties: None,
            messages: Vec::new(),
            outgoing: String::new(),
            auto_send: false,
        }
    }

    /// Mark the device as connected for a new session
    ///
    /// A record reused from an earlier session keeps its log and, if it was
    /// already identified, goes straight back to `Identified`.
    pub fn begin_session(&mut self, baud_rate: u32) {
        self.baud_rate = baud_rate;
        self.sampling_frequency = 0;
        self.status = if self.properties.is_some() {
            DeviceStatus::Identified
        } else {
            DeviceStatus::Connected
        };
    }

    /// Reset to `Disconnected` at the end of a session
    pub fn end_session(&mut self) {
        self.status = DeviceStatus::Disconnected;
        self.auto_send = false;
        self.sampling_frequency = 0;
    }

    /// Append a received chunk, returning its index
    pub fn push_message(&mut self, text: impl Into<String>) -> usize {
        let index = self.messages.len();
        self.messages.push(Message::new(index, text));
        index
    }

    /// All received messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Identification metadata, if the device has identified itself
    pub fn properties(&self) -> Option<&DeviceProperties> {
        self.properties.as_ref()
    }

    /// Populate the identification metadata
    ///
    /// All six fields are written together; a second call is rejected.
    pub fn set_properties(&mut self, properties: DeviceProperties) -> Result<()> {
        if self.properties.is_some() {
            return Err(SerialBenchError::PropertiesAlreadySet(
                self.port.to_string(),
            ));
        }
        self.properties = Some(properties);
        Ok(())
    }

    /// Whether a manual or automatic send is currently allowed
    pub fn can_send(&self) -> bool {
        self.status.is_sendable() && !self.outgoing.trim().is_empty()
    }
}

/// Thread-safe handle to a [`Device`]
#[derive(Debug, Clone)]
pub struct SharedDevice(Arc<RwLock<Device>>);

impl SharedDevice {
    pub fn new(device: Device) -> Self {
        Self(Arc::new(RwLock::new(device)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Device> {
        sync::read(&self.0)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Device> {
        sync::write(&self.0)
    }

    /// Clone the current state
    pub fn snapshot(&self) -> Device {
        self.read().clone()
    }
}
