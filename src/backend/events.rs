//! Events published by the connection manager
//!
//! Observers (a UI, the CLI, tests) call [`EventHub::subscribe`] and receive
//! every [`DeviceEvent`] on their own crossbeam channel. Events are published
//! from whichever thread caused them (discovery poller, pipeline consumer,
//! control path); marshaling them onto a UI thread is up to the observer.

use crate::sync;
use crate::types::{DeviceProperties, PortName};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Default capacity of each subscriber channel
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

/// Something observable happened to a port or device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A port appeared in the environment
    PortAdded(PortName),
    /// A port disappeared from the environment
    PortRemoved(PortName),
    /// A session was opened
    Connected { port: PortName, baud_rate: u32 },
    /// A session was closed
    Disconnected(PortName),
    /// A chunk was received and appended to the device log
    MessageReceived {
        port: PortName,
        index: usize,
        text: String,
    },
    /// The device identified itself
    Identified {
        port: PortName,
        properties: DeviceProperties,
    },
    /// A new sampling frequency was published
    SampleRate {
        port: PortName,
        messages_per_second: u32,
    },
    /// The reader hit a transport error and the pipeline was terminated
    TransportFault { port: PortName, error: String },
}

impl DeviceEvent {
    /// The port this event refers to
    pub fn port(&self) -> &PortName {
        match self {
            DeviceEvent::PortAdded(port)
            | DeviceEvent::PortRemoved(port)
            | DeviceEvent::Disconnected(port) => port,
            DeviceEvent::Connected { port, .. }
            | DeviceEvent::MessageReceived { port, .. }
            | DeviceEvent::Identified { port, .. }
            | DeviceEvent::SampleRate { port, .. }
            | DeviceEvent::TransportFault { port, .. } => port,
        }
    }
}

/// Fan-out of events to any number of subscribers
#[derive(Debug)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventHub {
    /// Create a hub whose subscriber channels hold up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> EventReceiver {
        // Bounded so a stalled observer cannot grow memory without limit
        let (tx, rx) = bounded(self.capacity);
        sync::lock(&self.subscribers).push(tx);
        EventReceiver { receiver: rx }
    }

    /// Deliver an event to every live subscriber
    ///
    /// Never blocks. A full subscriber loses the event and the drop is
    /// counted; a disconnected subscriber is removed.
    pub fn publish(&self, event: DeviceEvent) {
        let mut subscribers = sync::lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of events lost because a subscriber was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        sync::lock(&self.subscribers).len()
    }
}

/// Observer-side handle for receiving events
#[derive(Debug, Clone)]
pub struct EventReceiver {
    /// Receiver for published events
    pub receiver: Receiver<DeviceEvent>,
}

impl EventReceiver {
    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<DeviceEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DeviceEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Receive all pending events
    pub fn drain(&self) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives_events() {
        let hub = EventHub::default();
        let a = hub.subscribe();
        let b = hub.subscribe();

        hub.publish(DeviceEvent::PortAdded(PortName::new("COM3")));

        assert_eq!(a.drain(), vec![DeviceEvent::PortAdded(PortName::new("COM3"))]);
        assert_eq!(b.drain(), vec![DeviceEvent::PortAdded(PortName::new("COM3"))]);
    }

    #[test]
    fn test_full_subscriber_counts_drops() {
        let hub = EventHub::new(1);
        let rx = hub.subscribe();

        hub.publish(DeviceEvent::PortAdded(PortName::new("A")));
        hub.publish(DeviceEvent::PortAdded(PortName::new("B")));

        assert_eq!(hub.dropped_events(), 1);
        assert_eq!(rx.drain().len(), 1);
    }

    #[test]
    fn test_dropped_subscriber_is_removed() {
        let hub = EventHub::default();
        let rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        drop(rx);
        hub.publish(DeviceEvent::Disconnected(PortName::new("A")));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_event_port() {
        let event = DeviceEvent::MessageReceived {
            port: PortName::new("P1"),
            index: 0,
            text: "hi".into(),
        };
        assert_eq!(event.port().as_str(), "P1");
    }
}
