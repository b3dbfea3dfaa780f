//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use serialbench_rs::backend::EventReceiver;
use serialbench_rs::DeviceEvent;
use std::time::{Duration, Instant};

/// Upper bound for anything that waits on a background thread
pub fn test_timeout() -> Duration {
    Duration::from_secs(3)
}

/// Poll `condition` until it holds or the timeout expires
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Receive events until one matches `predicate`; returns everything received
///
/// Panics if no matching event arrives within [`test_timeout`].
pub fn collect_until(
    events: &EventReceiver,
    mut predicate: impl FnMut(&DeviceEvent) -> bool,
) -> Vec<DeviceEvent> {
    let deadline = Instant::now() + test_timeout();
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        if let Some(event) = events.recv_timeout(Duration::from_millis(20)) {
            let done = predicate(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }
    panic!("Expected event never arrived; saw {:?}", seen);
}

/// Messages carried by `MessageReceived` events for `port`, in order
pub fn received_texts(events: &[DeviceEvent], port: &str) -> Vec<(usize, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::MessageReceived { port: p, index, text } if p.as_str() == port => {
                Some((*index, text.clone()))
            }
            _ => None,
        })
        .collect()
}
