//! Backend module: serial transport, sessions and the ingestion pipeline
//!
//! Everything that touches a port runs on background threads owned by this
//! module. Observers talk to it through [`ConnectionRegistry`] and receive
//! [`DeviceEvent`]s on crossbeam channels.
//!
//! # Architecture
//!
//! - [`Transport`] - Seam to the OS: list ports, open a port as read/write halves
//! - [`PortDirectory`] / [`DiscoveryPoller`] - Track port arrival and removal
//! - [`PortSession`] - One open port: reader thread, writer handle, pipeline
//! - [`IngestionPipeline`] - Unbounded FIFO queue plus a single consumer thread
//! - [`ConnectionRegistry`] - Connect/disconnect/send, one session per port name
//! - [`AutoSendScheduler`] - Optional repeating send per device
//! - [`DeviceIdentifier`] - Classifies identification lines into [`DeviceProperties`](crate::types::DeviceProperties)
//! - [`SampleRateEstimator`] - Messages per second per device
//! - [`EventHub`] - Fan-out of [`DeviceEvent`]s to subscribers
//!
//! # Components
//!
//! - [`SerialPortTransport`] - Real hardware through the `serialport` crate
//! - [`SimulatedTransport`] - In-memory ports for tests and `--simulate` runs
//!
//! # Example
//!
//! ```ignore
//! use serialbench_rs::backend::{ConnectionRegistry, DeviceEvent, SimulatedTransport};
//! use std::sync::Arc;
//!
//! let sim = SimulatedTransport::with_ports(["SIM0"]);
//! let registry = ConnectionRegistry::with_defaults(Arc::new(sim.clone()));
//! let events = registry.subscribe();
//!
//! registry.connect("SIM0", 9600)?;
//! sim.push_incoming("SIM0", "Acme;Widget;X1;2024-01;PID9;1.2.0\r\n");
//!
//! for event in events.drain() {
//!     match event {
//!         DeviceEvent::Identified { port, properties } => {
//!             println!("{} is a {}", port, properties);
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod autosend;
pub mod directory;
pub mod events;
pub mod identifier;
pub mod pipeline;
pub mod registry;
pub mod sample_rate;
pub mod serial;
pub mod session;
pub mod simulated;
pub mod transport;

pub use autosend::{AutoSendScheduler, LineSender};
pub use directory::{DiscoveryPoller, PortDelta, PortDirectory};
pub use events::{DeviceEvent, EventHub, EventReceiver, DEFAULT_EVENT_CAPACITY};
pub use identifier::DeviceIdentifier;
pub use pipeline::{ChunkHandler, IngestionPipeline, PipelineProducer};
pub use registry::ConnectionRegistry;
pub use sample_rate::{SampleRateEstimator, SAMPLE_WINDOW};
pub use serial::SerialPortTransport;
pub use session::{PortSession, SessionOptions, SessionStats, SessionWriter};
pub use simulated::{EmulatorHandle, SimulatedTransport};
pub use transport::{PortLink, PortReader, PortWriter, Transport};
