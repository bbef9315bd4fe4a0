//! Process slot lifecycle. Kept in its own test binary since the slot is global.

use camtopo_core::TopologyError;
use camtopo_discovery::{SimInterface, SimulatedTransport, TopologyRegistry};
use std::sync::Arc;

#[test]
fn process_slot_lifecycle() {
    let sim = SimulatedTransport::new();
    sim.add_interface(SimInterface::gev("eth0"));

    let registry = TopologyRegistry::initialize(Arc::new(sim.clone())).unwrap();
    let again = TopologyRegistry::instance().unwrap();
    assert!(registry.same_instance(&again));
    assert_eq!(again.transport_name(), "simulated");

    let second = SimulatedTransport::new();
    assert_eq!(
        TopologyRegistry::initialize(Arc::new(second)).unwrap_err(),
        TopologyError::AlreadyInitialized
    );

    assert_eq!(registry.interfaces().unwrap().len(), 1);
    registry.release().unwrap();
    assert_eq!(again.release().unwrap_err(), TopologyError::AlreadyReleased);

    // The slot is free again once the instance is released.
    let fresh = TopologyRegistry::initialize(Arc::new(sim)).unwrap();
    assert!(!fresh.same_instance(&registry));
    fresh.release().unwrap();
}
