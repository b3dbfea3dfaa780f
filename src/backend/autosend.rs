//! Repeating send loop per device
//!
//! While a loop is active it re-reads the device's outgoing buffer on every
//! tick and sends it through a [`LineSender`], so edits to the buffer take
//! effect on the next send. A loop ends when it is stopped, when the device
//! leaves a sendable state, or when the sender goes away.
//!
//! Stopping is best effort: the flag is cleared and the loop is signalled,
//! but the caller does not wait for the thread. A send already in flight
//! still goes through the session writer, which is synchronised against
//! close.

use crate::device::SharedDevice;
use crate::sync;
use crate::types::PortName;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Anything that can write a line to a connected port
pub trait LineSender: Send + Sync {
    /// Returns false if the line could not be written
    fn send_line(&self, port: &PortName, text: &str) -> bool;
}

struct AutoSendLoop {
    active: Arc<AtomicBool>,
    cancel: Sender<()>,
    device: SharedDevice,
}

impl AutoSendLoop {
    fn cancel(self) {
        self.active.store(false, Ordering::SeqCst);
        self.device.write().auto_send = false;
        let _ = self.cancel.try_send(());
    }
}

/// Tracks the auto-send loops of every device
pub struct AutoSendScheduler {
    interval: Duration,
    loops: Mutex<HashMap<PortName, AutoSendLoop>>,
}

impl AutoSendScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            loops: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start sending the device's outgoing buffer every interval
    ///
    /// No-op (returns false) unless the device is Connected or Identified and
    /// its outgoing buffer is not blank. Starting an already active loop
    /// returns true without spawning another.
    pub fn start(&self, device: &SharedDevice, sender: Weak<dyn LineSender>) -> bool {
        let port = {
            let d = device.read();
            if !d.can_send() {
                tracing::debug!(
                    "Auto-send not started on {}: status {}, outgoing empty: {}",
                    d.port,
                    d.status,
                    d.outgoing.trim().is_empty()
                );
                return false;
            }
            d.port.clone()
        };

        let mut loops = sync::lock(&self.loops);
        loops.retain(|_, l| l.active.load(Ordering::SeqCst));
        if loops.contains_key(&port) {
            return true;
        }

        let active = Arc::new(AtomicBool::new(true));
        let (cancel, cancel_rx) = bounded::<()>(1);
        device.write().auto_send = true;

        let worker = Worker {
            port: port.clone(),
            device: device.clone(),
            sender,
            active: active.clone(),
            cancel_rx,
            interval: self.interval,
        };

        let spawned = std::thread::Builder::new()
            .name(format!("autosend-{}", port))
            .spawn(move || worker.run());

        if let Err(e) = spawned {
            tracing::error!("Failed to start auto-send on {}: {}", port, e);
            device.write().auto_send = false;
            return false;
        }

        tracing::info!("Auto-send started on {} every {:?}", port, self.interval);
        loops.insert(
            port,
            AutoSendLoop {
                active,
                cancel,
                device: device.clone(),
            },
        );
        true
    }

    /// Stop the loop for `port`; returns whether one was active
    pub fn stop(&self, port: &str) -> bool {
        let entry = sync::lock(&self.loops).remove(port);
        match entry {
            Some(l) => {
                let was_active = l.active.load(Ordering::SeqCst);
                l.cancel();
                if was_active {
                    tracing::info!("Auto-send stopped on {}", port);
                }
                was_active
            }
            None => false,
        }
    }

    /// Start if stopped, stop if running; returns the new state
    pub fn toggle(&self, device: &SharedDevice, sender: Weak<dyn LineSender>) -> bool {
        let port = device.read().port.clone();
        if self.is_active(port.as_str()) {
            self.stop(port.as_str());
            false
        } else {
            self.start(device, sender)
        }
    }

    pub fn is_active(&self, port: &str) -> bool {
        sync::lock(&self.loops)
            .get(port)
            .is_some_and(|l| l.active.load(Ordering::SeqCst))
    }

    /// Stop every loop
    pub fn stop_all(&self) {
        let loops: Vec<AutoSendLoop> = sync::lock(&self.loops).drain().map(|(_, l)| l).collect();
        for l in loops {
            l.cancel();
        }
    }
}

impl Drop for AutoSendScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

struct Worker {
    port: PortName,
    device: SharedDevice,
    sender: Weak<dyn LineSender>,
    active: Arc<AtomicBool>,
    cancel_rx: Receiver<()>,
    interval: Duration,
}

impl Worker {
    fn run(self) {
        let mut sent: u64 = 0;

        while self.active.load(Ordering::SeqCst) {
            let text = {
                let d = self.device.read();
                if !d.auto_send || !d.status.is_sendable() {
                    break;
                }
                d.outgoing.clone()
            };

            if !text.trim().is_empty() {
                let Some(sender) = self.sender.upgrade() else {
                    break;
                };
                if sender.send_line(&self.port, &text) {
                    sent += 1;
                }
            }

            select! {
                recv(self.cancel_rx) -> _ => break,
                default(self.interval) => {}
            }
        }

        // Ended on its own (device gone or no longer sendable)
        if self.active.swap(false, Ordering::SeqCst) {
            self.device.write().auto_send = false;
        }
        tracing::debug!("Auto-send loop for {} exited after {} sends", self.port, sent);
    }
}
