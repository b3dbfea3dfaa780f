//! # SerialBench-RS: Serial Device Test Bench
//!
//! A connection and data-pipeline manager for exercising devices over serial
//! links. It discovers ports, opens and closes sessions, streams text in both
//! directions, and identifies devices that announce themselves with a
//! `;`-separated identification line.
//!
//! ## Architecture
//!
//! - **Backend**: one reader thread and one ingestion thread per open port,
//!   plus a discovery poller and optional auto-send loops
//! - **Transport**: a trait seam over the `serialport` crate, with an
//!   in-memory implementation for tests and demos
//! - **Communication**: crossbeam channels between every thread, events
//!   fanned out to any number of subscribers
//!
//! ## Configuration
//!
//! Settings are read from `serialbench.toml` (or JSON) in the platform config
//! directory under `dev.hxyulin.serialbench-rs`:
//!
//! - **Linux**: `~/.config/dev.hxyulin.serialbench-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.serialbench-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.serialbench-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use serialbench_rs::{AppConfig, ConnectionRegistry, SerialPortTransport};
//! use std::sync::Arc;
//!
//! let config = AppConfig::load_or_default(None);
//! let registry = ConnectionRegistry::new(Arc::new(SerialPortTransport::new()), config);
//! registry.start_discovery()?;
//!
//! let events = registry.subscribe();
//! registry.connect_default("/dev/ttyACM0")?;
//! registry.set_outgoing("/dev/ttyACM0", "MEAS?");
//! registry.start_auto_send("/dev/ttyACM0");
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
mod sync;
pub mod types;

// Re-export commonly used types
pub use backend::{
    ConnectionRegistry, DeviceEvent, DeviceIdentifier, EventReceiver, SerialPortTransport,
    SimulatedTransport, Transport,
};
pub use config::AppConfig;
pub use device::Device;
pub use error::{Result, ResultExt, SerialBenchError};
pub use types::{DeviceProperties, DeviceStatus, Message, PortName, SerialSettings};
