//! Simulated environment helpers

use super::builders::ConfigBuilder;
use serialbench_rs::config::AppConfig;
use serialbench_rs::{ConnectionRegistry, SimulatedTransport};
use std::sync::Arc;

/// A registry over simulated ports, with fast test timings
pub fn simulated_registry(ports: &[&str]) -> (ConnectionRegistry, SimulatedTransport) {
    simulated_registry_with(ports, ConfigBuilder::new().build())
}

pub fn simulated_registry_with(
    ports: &[&str],
    config: AppConfig,
) -> (ConnectionRegistry, SimulatedTransport) {
    let sim = SimulatedTransport::with_ports(ports.iter().copied());
    let registry = ConnectionRegistry::new(Arc::new(sim.clone()), config);
    (registry, sim)
}
