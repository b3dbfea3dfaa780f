//! Port discovery
//!
//! [`PortDirectory`] keeps the last known set of port names and turns each
//! fresh sample from the transport into add/remove deltas. It does not care
//! what triggers a refresh: [`DiscoveryPoller`] calls it on a fixed tick, and
//! anything that receives native device-change notifications can call
//! [`DiscoveryPoller::trigger`] (or [`PortDirectory::refresh`] directly).

use super::events::{DeviceEvent, EventHub};
use super::transport::Transport;
use crate::error::Result;
use crate::sync;
use crate::types::PortName;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Ports that appeared and disappeared during one refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDelta {
    pub added: Vec<PortName>,
    pub removed: Vec<PortName>,
}

impl PortDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Tracks which ports are currently available
pub struct PortDirectory {
    transport: Arc<dyn Transport>,
    known: Mutex<BTreeSet<PortName>>,
    events: Arc<EventHub>,
}

impl PortDirectory {
    /// Create a directory with an empty snapshot
    pub fn new(transport: Arc<dyn Transport>, events: Arc<EventHub>) -> Self {
        Self {
            transport,
            known: Mutex::new(BTreeSet::new()),
            events,
        }
    }

    /// Sample the environment and publish the difference
    ///
    /// On a sampling error the snapshot is left untouched and no events are
    /// published.
    pub fn refresh(&self) -> Result<PortDelta> {
        // Hold the snapshot across sampling so concurrent refreshes cannot
        // publish the same delta twice
        let mut known = sync::lock(&self.known);

        let current: BTreeSet<PortName> = match self.transport.list_ports() {
            Ok(ports) => ports.into_iter().collect(),
            Err(e) => {
                tracing::warn!("Port scan failed, keeping previous snapshot: {}", e);
                return Err(e);
            }
        };

        let delta = PortDelta {
            added: current.difference(&known).cloned().collect(),
            removed: known.difference(&current).cloned().collect(),
        };
        *known = current;
        drop(known);

        for port in &delta.added {
            tracing::debug!("Port added: {}", port);
            self.events.publish(DeviceEvent::PortAdded(port.clone()));
        }
        for port in &delta.removed {
            tracing::debug!("Port removed: {}", port);
            self.events.publish(DeviceEvent::PortRemoved(port.clone()));
        }

        Ok(delta)
    }

    /// The current snapshot, sorted by name
    pub fn available(&self) -> Vec<PortName> {
        sync::lock(&self.known).iter().cloned().collect()
    }

    /// Whether `port` is in the current snapshot
    pub fn contains(&self, port: &str) -> bool {
        sync::lock(&self.known).contains(port)
    }
}

#[derive(Debug)]
enum PollerControl {
    Refresh,
    Stop,
}

/// Background thread that refreshes a [`PortDirectory`] periodically
#[derive(Debug)]
pub struct DiscoveryPoller {
    control: Sender<PollerControl>,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryPoller {
    /// Start polling; the first refresh happens immediately
    pub fn spawn(directory: Arc<PortDirectory>, interval: Duration) -> Result<Self> {
        let (control, control_rx) = unbounded();

        let handle = std::thread::Builder::new()
            .name("port-discovery".to_string())
            .spawn(move || {
                tracing::debug!("Discovery poller started ({:?} interval)", interval);
                loop {
                    // Errors are already logged by refresh; keep polling
                    let _ = directory.refresh();

                    match control_rx.recv_timeout(interval) {
                        Ok(PollerControl::Refresh) | Err(RecvTimeoutError::Timeout) => {}
                        Ok(PollerControl::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Discovery poller stopped");
            })?;

        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    /// Request an immediate refresh (e.g. from a device-change notification)
    pub fn trigger(&self) {
        let _ = self.control.send(PollerControl::Refresh);
    }

    /// Stop polling and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.control.send(PollerControl::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiscoveryPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
