//! camtopo Discovery - Hot-plug topology tracking for camera transports
//!
//! This crate provides:
//! - The [`TopologyRegistry`] singleton with snapshot/refresh semantics
//! - Interface and device handles that detect when they have gone stale
//! - Event subscriptions dispatched on a dedicated thread
//! - [`InterfaceWatch`], which re-subscribes after interface arrival/removal
//! - Transports: an in-memory simulation and host network adapters
//! - GigE address-configuration operations

mod dispatcher;
pub mod fixture;
pub mod gige;
pub mod handle;
pub mod host;
pub mod registry;
pub mod simulated;
pub mod subscription;
pub mod transport;
pub mod watch;

pub use fixture::{load_fixture, Fixture, FixtureError};
pub use gige::{
    auto_force_ip, configure_device, find_by_mac, find_by_serial, list_interfaces, DeviceReport,
    DeviceSelector, ForceIpOutcome, ForceIpReport, InterfaceReport, IpConfiguration, OpenFailure,
    WRONG_SUBNET_WARNING,
};
pub use handle::{DeviceHandle, InterfaceHandle};
pub use host::{select_adapters, Adapter, AdapterPolicy, HostTransport};
pub use registry::{GevEnumeration, RegistryOptions, TopologyRegistry};
pub use simulated::{SimDevice, SimInterface, SimulatedTransport};
pub use subscription::{
    CallbackKind, DeviceArrivalHandler, DeviceRemovalHandler, EventSubscription,
    InterfaceArrivalHandler, InterfaceEventHandler, InterfaceRemovalHandler, Registration,
    SubscriptionId, SubscriptionScope, SystemEventHandler,
};
pub use transport::{EventSink, TopologyEvent, Transport, TransportError, TransportInterface};
pub use watch::{InterfaceWatch, InterfaceWatchBuilder};
