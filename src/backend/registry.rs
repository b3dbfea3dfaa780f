//! Connection registry
//!
//! The [`ConnectionRegistry`] is the control surface of the crate: it owns
//! every open [`PortSession`], the [`Device`] record of each connected port,
//! the auto-send loops and the port directory, and publishes every change as a
//! [`DeviceEvent`].
//!
//! # Architecture
//!
//! ```text
//!  Transport ──open──► PortSession ──chunks──► IngestionPipeline
//!                          │                         │
//!                     SessionWriter            DeviceDispatcher
//!                          ▲                   (log, identify, rate)
//!   send / auto-send ──────┘                         │
//!                                                    ▼
//!                                 EventHub ──► subscribers
//! ```
//!
//! Connect and disconnect on the same port name are serialised by a per-name
//! mutex; different ports never wait on each other. Sends only take the
//! session map briefly to clone the writer handle.
//!
//! # Example
//!
//! ```ignore
//! use serialbench_rs::backend::{ConnectionRegistry, SerialPortTransport};
//! use std::sync::Arc;
//!
//! let registry = ConnectionRegistry::with_defaults(Arc::new(SerialPortTransport::new()));
//! let events = registry.subscribe();
//!
//! registry.connect("/dev/ttyUSB0", 115_200)?;
//! registry.send("/dev/ttyUSB0", "*IDN?");
//!
//! while let Some(event) = events.recv_timeout(Duration::from_secs(1)) {
//!     println!("{:?}", event);
//! }
//! registry.disconnect("/dev/ttyUSB0");
//! ```

use super::autosend::{AutoSendScheduler, LineSender};
use super::directory::{DiscoveryPoller, PortDelta, PortDirectory};
use super::events::{DeviceEvent, EventHub, EventReceiver};
use super::identifier::DeviceIdentifier;
use super::pipeline::ChunkHandler;
use super::sample_rate::SampleRateEstimator;
use super::session::{PortSession, SessionOptions, SessionStats};
use super::transport::Transport;
use crate::config::AppConfig;
use crate::device::{Device, SharedDevice};
use crate::error::{Result, SerialBenchError};
use crate::sync;
use crate::types::{DeviceStatus, PortName};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

/// Tracks open sessions and their devices
///
/// Cheap to clone; every clone controls the same sessions. Everything is shut
/// down when the last clone is dropped.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    config: AppConfig,
    sessions: RwLock<HashMap<PortName, PortSession>>,
    devices: RwLock<HashMap<PortName, SharedDevice>>,
    port_locks: Mutex<HashMap<PortName, Arc<Mutex<()>>>>,
    events: Arc<EventHub>,
    directory: Arc<PortDirectory>,
    autosend: AutoSendScheduler,
    poller: Mutex<Option<DiscoveryPoller>>,
}

impl ConnectionRegistry {
    /// Create a registry on top of `transport`
    ///
    /// Discovery is not started; call [`start_discovery`](Self::start_discovery)
    /// or [`refresh_ports`](Self::refresh_ports).
    pub fn new(transport: Arc<dyn Transport>, config: AppConfig) -> Self {
        let events = Arc::new(EventHub::new(config.pipeline.event_channel_capacity));
        let directory = Arc::new(PortDirectory::new(transport.clone(), events.clone()));
        let autosend = AutoSendScheduler::new(config.auto_send.interval());

        Self {
            inner: Arc::new(RegistryInner {
                transport,
                config,
                sessions: RwLock::new(HashMap::new()),
                devices: RwLock::new(HashMap::new()),
                port_locks: Mutex::new(HashMap::new()),
                events,
                directory,
                autosend,
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn with_defaults(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, AppConfig::default())
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    // ==================== Connection Lifecycle ====================

    /// Open `port` and start its pipeline
    ///
    /// Fails with `AlreadyConnected` if a live session exists, or with a
    /// transport error if the port cannot be opened; nothing is registered in
    /// either case. A session that faulted earlier is torn down first.
    pub fn connect(&self, port: &str, baud_rate: u32) -> Result<Device> {
        let port = PortName::new(port);
        let result = {
            let port_lock = self.inner.port_lock(&port);
            let _guard = sync::lock(&port_lock);
            self.inner.connect(port.clone(), baud_rate)
        };
        if result.is_err() {
            self.inner.release_port_lock(&port);
        }
        result
    }

    /// Connect at the configured default baud rate
    pub fn connect_default(&self, port: &str) -> Result<Device> {
        self.connect(port, self.inner.config.connection.default_baud_rate)
    }

    /// Close the session on `port`
    ///
    /// Returns false if there was nothing to close. When this returns, no
    /// further events for the closed session will be published.
    pub fn disconnect(&self, port: &str) -> bool {
        self.inner.disconnect(port)
    }

    /// Disconnect every port and stop discovery
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    // ==================== Queries ====================

    /// Whether `port` has a live (not faulted) session
    pub fn is_connected(&self, port: &str) -> bool {
        sync::read(&self.inner.sessions)
            .get(port)
            .is_some_and(|s| !s.is_faulted())
    }

    /// Status of the device on `port`; ports without a device are `Disconnected`
    pub fn status_of(&self, port: &str) -> DeviceStatus {
        sync::read(&self.inner.devices)
            .get(port)
            .map(|d| d.read().status)
            .unwrap_or_default()
    }

    /// A copy of the device record for `port`
    pub fn device(&self, port: &str) -> Option<Device> {
        sync::read(&self.inner.devices)
            .get(port)
            .map(SharedDevice::snapshot)
    }

    /// Copies of every device record, sorted by port name
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = sync::read(&self.inner.devices)
            .values()
            .map(SharedDevice::snapshot)
            .collect();
        devices.sort_by(|a, b| a.port.cmp(&b.port));
        devices
    }

    /// Ports with a live session, sorted
    pub fn connected_ports(&self) -> Vec<PortName> {
        let mut ports: Vec<PortName> = sync::read(&self.inner.sessions)
            .iter()
            .filter(|(_, s)| !s.is_faulted())
            .map(|(p, _)| p.clone())
            .collect();
        ports.sort();
        ports
    }

    pub fn session_stats(&self, port: &str) -> Option<SessionStats> {
        sync::read(&self.inner.sessions).get(port).map(|s| s.stats())
    }

    // ==================== Sending ====================

    /// Write `text` plus the line terminator to `port`
    ///
    /// Returns false (and logs) if the port is not open or the write fails.
    pub fn send(&self, port: &str, text: &str) -> bool {
        self.inner.send(port, text)
    }

    /// Replace the outgoing buffer of a connected device
    pub fn set_outgoing(&self, port: &str, text: impl Into<String>) -> bool {
        match sync::read(&self.inner.devices).get(port) {
            Some(device) => {
                device.write().outgoing = text.into();
                true
            }
            None => false,
        }
    }

    /// Send the device's outgoing buffer once
    ///
    /// Same precondition as auto-send: sendable status and non-blank text.
    pub fn send_outgoing(&self, port: &str) -> bool {
        let text = match sync::read(&self.inner.devices).get(port) {
            Some(device) => {
                let d = device.read();
                if !d.can_send() {
                    tracing::debug!("Nothing to send on {} ({})", port, d.status);
                    return false;
                }
                d.outgoing.clone()
            }
            None => return false,
        };
        self.send(port, &text)
    }

    // ==================== Auto-send ====================

    pub fn start_auto_send(&self, port: &str) -> bool {
        match self.shared_device(port) {
            Some(device) => self.inner.autosend.start(&device, self.line_sender()),
            None => false,
        }
    }

    pub fn stop_auto_send(&self, port: &str) -> bool {
        self.inner.autosend.stop(port)
    }

    /// Returns whether auto-send is running afterwards
    pub fn toggle_auto_send(&self, port: &str) -> bool {
        match self.shared_device(port) {
            Some(device) => self.inner.autosend.toggle(&device, self.line_sender()),
            None => false,
        }
    }

    pub fn is_auto_sending(&self, port: &str) -> bool {
        self.inner.autosend.is_active(port)
    }

    // ==================== Discovery & Events ====================

    /// Register a new event subscriber
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Events lost because a subscriber was full
    pub fn dropped_events(&self) -> u64 {
        self.inner.events.dropped_events()
    }

    pub fn directory(&self) -> Arc<PortDirectory> {
        self.inner.directory.clone()
    }

    /// Sample available ports now
    pub fn refresh_ports(&self) -> Result<PortDelta> {
        self.inner.directory.refresh()
    }

    pub fn available_ports(&self) -> Vec<PortName> {
        self.inner.directory.available()
    }

    /// Start the background discovery poller
    ///
    /// Does nothing if discovery is disabled in the config or already running.
    pub fn start_discovery(&self) -> Result<()> {
        let discovery = &self.inner.config.discovery;
        if !discovery.enabled {
            tracing::debug!("Port discovery disabled by config");
            return Ok(());
        }

        let mut poller = sync::lock(&self.inner.poller);
        if poller.is_none() {
            *poller = Some(DiscoveryPoller::spawn(
                self.inner.directory.clone(),
                discovery.poll_interval(),
            )?);
        }
        Ok(())
    }

    /// Ask the poller for an immediate refresh, e.g. on a device-change notification
    pub fn trigger_discovery(&self) {
        match sync::lock(&self.inner.poller).as_ref() {
            Some(poller) => poller.trigger(),
            None => {
                let _ = self.inner.directory.refresh();
            }
        }
    }

    pub fn stop_discovery(&self) {
        if let Some(poller) = sync::lock(&self.inner.poller).take() {
            poller.stop();
        }
    }

    fn shared_device(&self, port: &str) -> Option<SharedDevice> {
        sync::read(&self.inner.devices).get(port).cloned()
    }

    fn line_sender(&self) -> Weak<dyn LineSender> {
        let inner: Arc<dyn LineSender> = self.inner.clone();
        Arc::downgrade(&inner)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connected", &self.connected_ports())
            .finish()
    }
}

impl RegistryInner {
    fn port_lock(&self, port: &PortName) -> Arc<Mutex<()>> {
        sync::lock(&self.port_locks)
            .entry(port.clone())
            .or_default()
            .clone()
    }

    /// Drop the record left behind by a faulted session that could not be reopened
    fn forget_device(&self, port: &PortName) {
        let removed = sync::write(&self.devices).remove(port);
        if removed.is_some() {
            tracing::debug!("Dropped stale device record for {}", port);
            self.events.publish(DeviceEvent::Disconnected(port.clone()));
        }
    }

    /// Remove the lock entry for `port` once no caller holds it
    fn release_port_lock(&self, port: &PortName) {
        let mut locks = sync::lock(&self.port_locks);
        if locks.get(port).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(port);
        }
    }

    fn connect(&self, port: PortName, baud_rate: u32) -> Result<Device> {
        let faulted = sync::read(&self.sessions).get(&port).map(|s| s.is_faulted());
        let reaped = match faulted {
            Some(false) => return Err(SerialBenchError::AlreadyConnected(port.to_string())),
            Some(true) => {
                tracing::debug!("Reaping faulted session on {}", port);
                self.autosend.stop(port.as_str());
                // Release the map before joining the session's threads
                let stale = sync::write(&self.sessions).remove(&port);
                if let Some(stale) = stale {
                    stale.shutdown();
                }
                true
            }
            None => false,
        };

        let settings = self.config.serial_settings(baud_rate);
        let link = match self.transport.open(&port, &settings) {
            Ok(link) => link,
            Err(e) => {
                if reaped {
                    self.forget_device(&port);
                }
                return Err(e.with_context(format!("Failed to open {}", port)));
            }
        };

        let existing = sync::read(&self.devices).get(&port).cloned();
        let is_new = existing.is_none();
        let device =
            existing.unwrap_or_else(|| SharedDevice::new(Device::new(port.clone(), baud_rate)));
        device.write().begin_session(baud_rate);

        self.events.publish(DeviceEvent::Connected {
            port: port.clone(),
            baud_rate,
        });

        let dispatcher = DeviceDispatcher {
            port: port.clone(),
            device: device.clone(),
            events: self.events.clone(),
            rate: SampleRateEstimator::new(Instant::now()),
        };

        let fault_device = device.clone();
        let fault_events = self.events.clone();
        let on_fault = Box::new(move |port: &PortName, err: &SerialBenchError| {
            fault_device.write().end_session();
            fault_events.publish(DeviceEvent::TransportFault {
                port: port.clone(),
                error: err.to_string(),
            });
        });

        let options = SessionOptions {
            poll_interval: self.config.connection.read_poll_interval(),
            idle_tick: self.config.pipeline.idle_tick(),
        };

        let session =
            match PortSession::start(port.clone(), settings, link, dispatcher, options, on_fault) {
                Ok(s) => s,
                Err(e) => {
                    device.write().end_session();
                    if !is_new {
                        sync::write(&self.devices).remove(&port);
                    }
                    self.events.publish(DeviceEvent::Disconnected(port.clone()));
                    return Err(e.with_context(format!("Failed to start session on {}", port)));
                }
            };

        tracing::info!("Connected to {} ({})", port, session.settings());
        sync::write(&self.sessions).insert(port.clone(), session);
        if is_new {
            sync::write(&self.devices).insert(port, device.clone());
        }

        Ok(device.snapshot())
    }

    fn disconnect(&self, port: &str) -> bool {
        let port = PortName::new(port);
        let closed = {
            let port_lock = self.port_lock(&port);
            let _guard = sync::lock(&port_lock);
            self.close_session(&port)
        };
        self.release_port_lock(&port);
        closed
    }

    fn close_session(&self, port: &PortName) -> bool {
        let Some(session) = sync::write(&self.sessions).remove(port) else {
            return false;
        };

        self.autosend.stop(port.as_str());
        let stats = session.stats();
        session.shutdown();

        let device = sync::write(&self.devices).remove(port);
        if let Some(device) = device {
            device.write().end_session();
        }
        self.events.publish(DeviceEvent::Disconnected(port.clone()));

        tracing::info!(
            "Disconnected from {} ({} chunks, {} bytes read, {} lines written)",
            port,
            stats.chunks_read,
            stats.bytes_read,
            stats.lines_written
        );
        true
    }

    fn send(&self, port: &str, text: &str) -> bool {
        let writer = sync::read(&self.sessions)
            .get(port)
            .filter(|s| !s.is_faulted())
            .map(|s| s.writer());

        let Some(writer) = writer else {
            tracing::warn!("Cannot send to {}: not connected", port);
            return false;
        };

        match writer.send_line(text) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Send to {} failed: {}", port, e);
                false
            }
        }
    }

    fn shutdown(&self) {
        if let Some(poller) = sync::lock(&self.poller).take() {
            poller.stop();
        }
        self.autosend.stop_all();

        let ports: Vec<PortName> = sync::read(&self.sessions).keys().cloned().collect();
        for port in ports {
            self.disconnect(port.as_str());
        }
    }
}

impl LineSender for RegistryInner {
    fn send_line(&self, port: &PortName, text: &str) -> bool {
        self.send(port.as_str(), text)
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pipeline consumer for one device
///
/// Appends each chunk to the device log, runs identification while the
/// device is `Connected`, and feeds the sample-rate estimator.
struct DeviceDispatcher {
    port: PortName,
    device: SharedDevice,
    events: Arc<EventHub>,
    rate: SampleRateEstimator,
}

impl ChunkHandler for DeviceDispatcher {
    fn on_chunk(&mut self, chunk: String) {
        let now = Instant::now();

        let (index, identified, rate) = {
            let mut device = self.device.write();
            let index = device.push_message(chunk.clone());
            let identified = DeviceIdentifier::apply(&mut device, &chunk);
            let rate = self.rate.record(now);
            if let Some(rate) = rate {
                device.sampling_frequency = rate;
            }
            (index, identified, rate)
        };

        self.events.publish(DeviceEvent::MessageReceived {
            port: self.port.clone(),
            index,
            text: chunk,
        });
        if let Some(properties) = identified {
            self.events.publish(DeviceEvent::Identified {
                port: self.port.clone(),
                properties,
            });
        }
        if let Some(messages_per_second) = rate {
            self.events.publish(DeviceEvent::SampleRate {
                port: self.port.clone(),
                messages_per_second,
            });
        }
    }

    fn on_idle(&mut self, now: Instant) {
        let Some(rate) = self.rate.tick(now) else {
            return;
        };

        let changed = {
            let mut device = self.device.write();
            let changed = device.sampling_frequency != rate;
            device.sampling_frequency = rate;
            changed
        };

        // A silent device would otherwise report zero every window
        if changed {
            self.events.publish(DeviceEvent::SampleRate {
                port: self.port.clone(),
                messages_per_second: rate,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedTransport;
    use crate::backend::transport::MockTransport;
    use std::time::Duration;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.connection.read_poll_interval_ms = 1;
        config.pipeline.idle_tick_ms = 10;
        config.auto_send.interval_ms = 5;
        config
    }

    fn registry_with(ports: &[&str]) -> (ConnectionRegistry, SimulatedTransport) {
        let sim = SimulatedTransport::with_ports(ports.iter().copied());
        let registry = ConnectionRegistry::new(Arc::new(sim.clone()), fast_config());
        (registry, sim)
    }

    fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        f()
    }

    #[test]
    fn test_connect_registers_device() {
        let (registry, sim) = registry_with(&["P1"]);

        let device = registry.connect("P1", 115_200).unwrap();
        assert_eq!(device.status, DeviceStatus::Connected);
        assert_eq!(device.baud_rate, 115_200);
        assert!(registry.is_connected("P1"));
        assert_eq!(registry.connected_ports(), vec![PortName::new("P1")]);
        assert_eq!(sim.last_settings().unwrap().baud_rate, 115_200);
    }

    #[test]
    fn test_second_connect_is_rejected() {
        let (registry, sim) = registry_with(&["P1"]);
        registry.connect("P1", 9600).unwrap();

        let err = registry.connect("P1", 9600).unwrap_err();
        assert!(err.is_already_connected());
        assert_eq!(sim.open_count("P1"), 1);
    }

    #[test]
    fn test_open_failure_registers_nothing() {
        let mut transport = MockTransport::new();
        transport
            .expect_open()
            .returning(|port, _| Err(SerialBenchError::transport(port.as_str(), "Access denied")));

        let registry = ConnectionRegistry::new(Arc::new(transport), fast_config());
        let err = registry.connect("COM9", 9600).unwrap_err();

        assert!(err.to_string().contains("Access denied"));
        assert!(!registry.is_connected("COM9"));
        assert_eq!(registry.status_of("COM9"), DeviceStatus::Disconnected);
        assert!(registry.device("COM9").is_none());
        assert!(registry.devices().is_empty());
    }

    #[test]
    fn test_disconnect_cleans_up() {
        let (registry, sim) = registry_with(&["P1"]);
        registry.connect("P1", 9600).unwrap();

        assert!(registry.disconnect("P1"));
        assert!(!registry.is_connected("P1"));
        assert!(registry.device("P1").is_none());
        assert!(!sim.is_open("P1"));

        assert!(!registry.disconnect("P1"));
    }

    #[test]
    fn test_send_requires_open_port() {
        let (registry, sim) = registry_with(&["P1"]);
        assert!(!registry.send("P1", "hello"));

        registry.connect("P1", 9600).unwrap();
        assert!(registry.send("P1", "hello"));
        assert_eq!(sim.written("P1"), vec!["hello"]);
    }

    #[test]
    fn test_chunks_become_messages() {
        let (registry, sim) = registry_with(&["P1"]);
        registry.connect("P1", 9600).unwrap();

        sim.push_incoming("P1", "first");
        sim.push_incoming("P1", "second");

        assert!(wait_until(Duration::from_secs(2), || {
            registry.device("P1").is_some_and(|d| d.messages().len() == 2)
        }));
        let device = registry.device("P1").unwrap();
        assert_eq!(device.messages()[0].text, "first");
        assert_eq!(device.messages()[1].index, 1);
    }

    #[test]
    fn test_identification_through_pipeline() {
        let (registry, sim) = registry_with(&["P1"]);
        registry.connect("P1", 9600).unwrap();

        sim.push_incoming("P1", "Acme;Widget;X1;2024-01;PID9;1.2.0\r\n");

        assert!(wait_until(Duration::from_secs(2), || {
            registry.status_of("P1") == DeviceStatus::Identified
        }));
        let device = registry.device("P1").unwrap();
        assert_eq!(device.properties().unwrap().product_id, "PID9");
    }

    #[test]
    fn test_send_outgoing_uses_buffer() {
        let (registry, sim) = registry_with(&["P1"]);
        registry.connect("P1", 9600).unwrap();

        assert!(!registry.send_outgoing("P1"));
        assert!(registry.set_outgoing("P1", "MEAS?"));
        assert!(registry.send_outgoing("P1"));
        assert_eq!(sim.written("P1"), vec!["MEAS?"]);
    }

    #[test]
    fn test_read_fault_marks_device_disconnected() {
        let (registry, sim) = registry_with(&["P1"]);
        let events = registry.subscribe();
        registry.connect("P1", 9600).unwrap();

        sim.inject_read_error("P1", "device unplugged");

        let mut faulted = false;
        while let Some(event) = events.recv_timeout(Duration::from_secs(2)) {
            if matches!(event, DeviceEvent::TransportFault { .. }) {
                faulted = true;
                break;
            }
        }
        assert!(faulted);
        assert!(!registry.is_connected("P1"));
        assert_eq!(registry.status_of("P1"), DeviceStatus::Disconnected);
        assert!(registry.device("P1").is_some());
        assert!(!registry.send("P1", "x"));

        // Reconnect reaps the faulted session and reuses the record
        registry.connect("P1", 9600).unwrap();
        assert!(registry.is_connected("P1"));
        assert_eq!(sim.open_count("P1"), 2);
    }

    fn wait_for_fault(events: &EventReceiver) -> bool {
        while let Some(event) = events.recv_timeout(Duration::from_secs(2)) {
            if matches!(event, DeviceEvent::TransportFault { .. }) {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_failed_reopen_drops_faulted_record() {
        let (registry, sim) = registry_with(&["P1"]);
        let events = registry.subscribe();
        registry.connect("P1", 9600).unwrap();

        sim.inject_read_error("P1", "framing error");
        assert!(wait_for_fault(&events));
        assert!(registry.device("P1").is_some());

        sim.set_open_failure("P1", Some("Access is denied"));
        assert!(registry.connect("P1", 9600).is_err());

        assert!(registry.device("P1").is_none());
        assert!(registry.devices().is_empty());
        let seen = events.drain();
        assert_eq!(
            seen.last(),
            Some(&DeviceEvent::Disconnected(PortName::new("P1")))
        );
        assert!(!registry.disconnect("P1"));

        sim.set_open_failure("P1", None);
        let device = registry.connect("P1", 9600).unwrap();
        assert!(device.messages().is_empty());
    }

    #[test]
    fn test_reaping_does_not_block_other_ports() {
        use crate::backend::transport::{MockPortReader, MockPortWriter, PortLink};

        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let mut slow_close = Some((entered_tx, release_rx));

        let mut transport = MockTransport::new();
        transport.expect_open().returning(move |port, _| {
            let mut reader = MockPortReader::new();
            let mut writer = MockPortWriter::new();
            if port.as_str() == "P2" {
                reader.expect_read_available().returning(|| Ok(None));
                writer.expect_close().return_const(());
                return Ok(PortLink::new(Box::new(reader), Box::new(writer)));
            }
            match slow_close.take() {
                Some((entered, release)) => {
                    reader
                        .expect_read_available()
                        .returning(|| Err(SerialBenchError::transport("P1", "device unplugged")));
                    writer.expect_close().returning(move || {
                        let _ = entered.send(());
                        let _ = release.recv();
                    });
                    Ok(PortLink::new(Box::new(reader), Box::new(writer)))
                }
                None => Err(SerialBenchError::transport(port.as_str(), "Access denied")),
            }
        });

        let registry = ConnectionRegistry::new(Arc::new(transport), fast_config());
        let events = registry.subscribe();
        registry.connect("P1", 9600).unwrap();
        registry.connect("P2", 9600).unwrap();
        assert!(wait_for_fault(&events));

        // Reconnect P1; its stale writer blocks in close until released
        let reconnect = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.connect("P1", 9600))
        };
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let (answer_tx, answer_rx) = crossbeam_channel::bounded(1);
        {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let _ = answer_tx.send(registry.is_connected("P2"));
            });
        }
        let answer = answer_rx.recv_timeout(Duration::from_secs(1));
        release_tx.send(()).unwrap();

        assert_eq!(answer, Ok(true));
        assert!(reconnect.join().unwrap().is_err());
        assert!(registry.device("P1").is_none());
    }

    #[test]
    fn test_port_locks_are_released() {
        let (registry, _sim) = registry_with(&["P1", "P2"]);
        registry.connect("P1", 9600).unwrap();
        registry.connect("P2", 9600).unwrap();
        assert!(registry.connect("P9", 9600).is_err());
        assert!(!sync::lock(&registry.inner.port_locks).contains_key("P9"));

        registry.disconnect("P1");
        registry.disconnect("P2");
        assert!(!registry.disconnect("P3"));
        assert!(sync::lock(&registry.inner.port_locks).is_empty());
    }

    #[test]
    fn test_shutdown_disconnects_everything() {
        let (registry, sim) = registry_with(&["P1", "P2"]);
        registry.connect("P1", 9600).unwrap();
        registry.connect("P2", 9600).unwrap();

        registry.shutdown();
        assert!(registry.connected_ports().is_empty());
        assert!(!sim.is_open("P1"));
        assert!(!sim.is_open("P2"));
    }

    #[test]
    fn test_drop_releases_ports() {
        let (registry, sim) = registry_with(&["P1"]);
        registry.connect("P1", 9600).unwrap();
        drop(registry);
        assert!(!sim.is_open("P1"));
    }
}
