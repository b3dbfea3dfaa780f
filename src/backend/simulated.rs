//! Simulated Transport for Testing
//!
//! This module provides an in-memory serial environment that can be used to
//! run the connection manager without real hardware.
//!
//! # Features
//!
//! - **Dynamic port set**: add and remove ports to exercise discovery
//! - **Injected input**: queue chunks that the next reads will return, one chunk per read
//! - **Captured output**: every written line is recorded per port
//! - **Fault injection**: failed enumeration, failed open, read errors
//! - **Echo**: optionally loop written lines back as input
//! - **Device emulation**: a background thread that identifies itself and then streams readings
//!
//! # Example
//!
//! ```ignore
//! use serialbench_rs::backend::SimulatedTransport;
//!
//! let sim = SimulatedTransport::with_ports(["SIM0"]);
//! sim.push_incoming("SIM0", "Acme;Widget;X1;2024-01;PID9;1.2.0\r\n");
//!
//! let registry = ConnectionRegistry::with_defaults(Arc::new(sim.clone()));
//! registry.connect("SIM0", 9600)?;
//! ```

use super::transport::{PortLink, PortReader, PortWriter, Transport};
use crate::error::{Result, SerialBenchError};
use crate::sync;
use crate::types::{PortName, SerialSettings, LINE_TERMINATOR};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// State of one simulated port
#[derive(Debug, Default)]
struct SimulatedPort {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<String>,
    open_count: usize,
    is_open: bool,
    echo: bool,
    fail_open: Option<String>,
    read_error: Option<String>,
}

#[derive(Debug, Default)]
struct SimulatedState {
    ports: BTreeMap<PortName, SimulatedPort>,
    listing_error: Option<String>,
    last_settings: Option<SerialSettings>,
}

/// In-memory transport; clones share the same state
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedTransport {
    /// Create a transport with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport with the given ports present
    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PortName>,
    {
        let sim = Self::new();
        for port in ports {
            sim.add_port(port);
        }
        sim
    }

    /// Make a port appear
    pub fn add_port(&self, port: impl Into<PortName>) {
        sync::lock(&self.state)
            .ports
            .entry(port.into())
            .or_default();
    }

    /// Make a port disappear
    pub fn remove_port(&self, port: &str) {
        sync::lock(&self.state).ports.remove(port);
    }

    /// Queue a chunk that a future read on `port` will return
    pub fn push_incoming(&self, port: &str, chunk: impl Into<String>) {
        let mut state = sync::lock(&self.state);
        if let Some(p) = state.ports.get_mut(port) {
            p.incoming.push_back(chunk.into().into_bytes());
        }
    }

    /// Lines written to `port`, without terminators
    pub fn written(&self, port: &str) -> Vec<String> {
        sync::lock(&self.state)
            .ports
            .get(port)
            .map(|p| p.written.clone())
            .unwrap_or_default()
    }

    /// Number of chunks not yet read from `port`
    pub fn pending_incoming(&self, port: &str) -> usize {
        sync::lock(&self.state)
            .ports
            .get(port)
            .map(|p| p.incoming.len())
            .unwrap_or(0)
    }

    /// Whether `port` currently has an open writer
    pub fn is_open(&self, port: &str) -> bool {
        sync::lock(&self.state)
            .ports
            .get(port)
            .is_some_and(|p| p.is_open)
    }

    /// How many times `port` has been opened
    pub fn open_count(&self, port: &str) -> usize {
        sync::lock(&self.state)
            .ports
            .get(port)
            .map(|p| p.open_count)
            .unwrap_or(0)
    }

    /// Settings used by the most recent successful open
    pub fn last_settings(&self) -> Option<SerialSettings> {
        sync::lock(&self.state).last_settings.clone()
    }

    /// Make the next `list_ports` call fail
    pub fn fail_next_listing(&self, message: impl Into<String>) {
        sync::lock(&self.state).listing_error = Some(message.into());
    }

    /// Make every `open` of `port` fail until cleared with `None`
    pub fn set_open_failure(&self, port: &str, message: Option<&str>) {
        if let Some(p) = sync::lock(&self.state).ports.get_mut(port) {
            p.fail_open = message.map(str::to_string);
        }
    }

    /// Make the next read on `port` fail
    pub fn inject_read_error(&self, port: &str, message: impl Into<String>) {
        if let Some(p) = sync::lock(&self.state).ports.get_mut(port) {
            p.read_error = Some(message.into());
        }
    }

    /// Loop written lines back as input
    pub fn set_echo(&self, port: &str, echo: bool) {
        if let Some(p) = sync::lock(&self.state).ports.get_mut(port) {
            p.echo = echo;
        }
    }

    /// Start a thread that behaves like an attached device
    ///
    /// The emulator first sends `ident_line`, then a `reading <n>` line every
    /// `interval` until the returned handle is stopped or dropped.
    pub fn spawn_device_emulator(
        &self,
        port: impl Into<PortName>,
        ident_line: impl Into<String>,
        interval: Duration,
    ) -> Result<EmulatorHandle> {
        let port = port.into();
        let ident_line = ident_line.into();
        let sim = self.clone();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name(format!("sim-{}", port))
            .spawn(move || {
                let mut sent_ident = false;
                let mut counter: u64 = 0;
                loop {
                    if sim.is_open(port.as_str()) {
                        if !sent_ident {
                            sim.push_incoming(port.as_str(), format!("{}\r\n", ident_line));
                            sent_ident = true;
                        } else {
                            sim.push_incoming(port.as_str(), format!("reading {}\r\n", counter));
                            counter += 1;
                        }
                    } else {
                        sent_ident = false;
                    }

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                }
            })?;

        Ok(EmulatorHandle {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

impl Transport for SimulatedTransport {
    fn list_ports(&self) -> Result<Vec<PortName>> {
        let mut state = sync::lock(&self.state);
        if let Some(message) = state.listing_error.take() {
            return Err(SerialBenchError::transport("<enumerate>", message));
        }
        Ok(state.ports.keys().cloned().collect())
    }

    fn open(&self, port: &PortName, settings: &SerialSettings) -> Result<PortLink> {
        let mut state = sync::lock(&self.state);
        let p = state
            .ports
            .get_mut(port.as_str())
            .ok_or_else(|| SerialBenchError::transport(port.as_str(), "No such port"))?;

        if let Some(message) = &p.fail_open {
            return Err(SerialBenchError::transport(port.as_str(), message));
        }

        p.open_count += 1;
        p.is_open = true;
        p.incoming.clear();
        state.last_settings = Some(settings.clone());

        Ok(PortLink::new(
            Box::new(SimulatedReader {
                port: port.clone(),
                state: self.state.clone(),
            }),
            Box::new(SimulatedWriter {
                port: port.clone(),
                state: self.state.clone(),
                open: true,
            }),
        ))
    }
}

struct SimulatedReader {
    port: PortName,
    state: Arc<Mutex<SimulatedState>>,
}

impl PortReader for SimulatedReader {
    fn read_available(&mut self) -> Result<Option<Vec<u8>>> {
        let mut state = sync::lock(&self.state);
        let p = state
            .ports
            .get_mut(self.port.as_str())
            .ok_or_else(|| SerialBenchError::transport(self.port.as_str(), "Device removed"))?;

        if let Some(message) = p.read_error.take() {
            return Err(SerialBenchError::transport(self.port.as_str(), message));
        }
        Ok(p.incoming.pop_front())
    }
}

struct SimulatedWriter {
    port: PortName,
    state: Arc<Mutex<SimulatedState>>,
    open: bool,
}

impl PortWriter for SimulatedWriter {
    fn write_line(&mut self, text: &str) -> Result<()> {
        if !self.open {
            return Err(SerialBenchError::NotConnected(self.port.to_string()));
        }
        let mut state = sync::lock(&self.state);
        let p = state
            .ports
            .get_mut(self.port.as_str())
            .ok_or_else(|| SerialBenchError::transport(self.port.as_str(), "Device removed"))?;

        p.written.push(text.to_string());
        if p.echo {
            p.incoming
                .push_back(format!("{}{}", text, LINE_TERMINATOR).into_bytes());
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Some(p) = sync::lock(&self.state).ports.get_mut(self.port.as_str()) {
            p.is_open = false;
        }
    }
}

/// Handle to a running device emulator thread
#[derive(Debug)]
pub struct EmulatorHandle {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EmulatorHandle {
    /// Stop the emulator and wait for its thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_are_read_one_at_a_time() {
        let sim = SimulatedTransport::with_ports(["SIM0"]);
        let mut link = sim
            .open(&PortName::new("SIM0"), &SerialSettings::default())
            .unwrap();

        sim.push_incoming("SIM0", "a");
        sim.push_incoming("SIM0", "b");

        assert_eq!(link.reader.read_available().unwrap(), Some(b"a".to_vec()));
        assert_eq!(link.reader.read_available().unwrap(), Some(b"b".to_vec()));
        assert_eq!(link.reader.read_available().unwrap(), None);
    }

    #[test]
    fn test_written_lines_and_echo() {
        let sim = SimulatedTransport::with_ports(["SIM0"]);
        let mut link = sim
            .open(&PortName::new("SIM0"), &SerialSettings::default())
            .unwrap();

        sim.set_echo("SIM0", true);
        link.writer.write_line("ping").unwrap();

        assert_eq!(sim.written("SIM0"), vec!["ping".to_string()]);
        assert_eq!(link.reader.read_available().unwrap(), Some(b"ping\n".to_vec()));
    }

    #[test]
    fn test_close_rejects_writes() {
        let sim = SimulatedTransport::with_ports(["SIM0"]);
        let mut link = sim
            .open(&PortName::new("SIM0"), &SerialSettings::default())
            .unwrap();
        assert!(sim.is_open("SIM0"));

        link.writer.close();
        assert!(!sim.is_open("SIM0"));
        assert!(link.writer.write_line("late").is_err());
    }

    #[test]
    fn test_fault_injection() {
        let sim = SimulatedTransport::with_ports(["SIM0"]);

        sim.fail_next_listing("bus reset");
        assert!(sim.list_ports().is_err());
        assert_eq!(sim.list_ports().unwrap(), vec![PortName::new("SIM0")]);

        sim.set_open_failure("SIM0", Some("Access denied"));
        assert!(sim
            .open(&PortName::new("SIM0"), &SerialSettings::default())
            .is_err());
        assert_eq!(sim.open_count("SIM0"), 0);

        assert!(sim
            .open(&PortName::new("missing"), &SerialSettings::default())
            .is_err());
    }

    #[test]
    fn test_emulator_sends_ident_first() {
        let sim = SimulatedTransport::with_ports(["SIM0"]);
        let mut link = sim
            .open(&PortName::new("SIM0"), &SerialSettings::default())
            .unwrap();

        let emulator = sim
            .spawn_device_emulator("SIM0", "Acme;Widget;X1;2024-01;PID9;1.2.0", Duration::from_millis(5))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        emulator.stop();

        let first = link.reader.read_available().unwrap().unwrap();
        assert_eq!(first, b"Acme;Widget;X1;2024-01;PID9;1.2.0\r\n".to_vec());
        let second = link.reader.read_available().unwrap().unwrap();
        assert_eq!(second, b"reading 0\r\n".to_vec());
    }
}
