//! Process-wide topology registry
//!
//! The registry owns the current [`TopologySnapshot`] and the subscription
//! table. Readers load the snapshot lock-free through an `ArcSwapOption`;
//! refreshes are serialized by a mutex and swap the whole snapshot at once,
//! so no reader can observe a half-built tree.

use arc_swap::ArcSwapOption;
use camtopo_core::{
    names, DeviceIdentity, EnumerationIssue, InterfaceType, NodeMap, SnapshotBuilder,
    TopologyError, TopologySnapshot,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::dispatcher::{self, SignalQueue};
use crate::handle::{DeviceHandle, InterfaceHandle};
use crate::host::HostTransport;
use crate::subscription::{EventSubscription, Registration, SubscriptionScope, SubscriptionTable};
use crate::transport::{EventSink, TopologyEvent, Transport, TransportError, TransportInterface};

static PROCESS: Mutex<Option<TopologyRegistry>> = parking_lot::const_mutex(None);

/// Registry tuning
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Capacity of the async event broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            broadcast_capacity: 100,
        }
    }
}

/// State of the `EnumerateGEVInterfaces` system node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GevEnumeration {
    Enabled,
    Disabled,
    /// The node is missing or unreadable
    Unavailable,
}

impl fmt::Display for GevEnumeration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => f.write_str("enabled"),
            Self::Disabled => f.write_str("disabled"),
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}

pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    snapshot: ArcSwapOption<TopologySnapshot>,
    generation: AtomicU64,
    pub(crate) refresh_lock: Mutex<()>,
    released: AtomicBool,
    pub(crate) subscriptions: SubscriptionTable,
    pub(crate) signals: Arc<SignalQueue>,
    pub(crate) events: broadcast::Sender<TopologyEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Generation of the current snapshot, 0 before the first refresh
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), TopologyError> {
        if self.is_released() {
            Err(TopologyError::AlreadyReleased)
        } else {
            Ok(())
        }
    }

    pub(crate) fn transport_error(&self, err: TransportError) -> TopologyError {
        match err {
            TransportError::InvalidAddress { serial, reason } => {
                TopologyError::InvalidAddress { serial, reason }
            }
            other => TopologyError::Enumeration {
                transport: self.transport.name().to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Enumerate and swap in a new snapshot. Caller holds `refresh_lock`.
    fn refresh_locked(&self) -> Result<Arc<TopologySnapshot>, TopologyError> {
        self.ensure_live()?;

        let mark = self.signals.begin_enumeration();
        let found = match self.transport.enumerate() {
            Ok(found) => found,
            Err(e) => {
                self.signals.abandon_enumeration();
                warn!(transport = self.transport.name(), error = %e, "Enumeration failed, keeping previous snapshot");
                return Err(self.transport_error(e));
            }
        };

        let generation = self.generation() + 1;
        let snapshot = Arc::new(build_snapshot(generation, found));
        // Publish the generation first so handles from the old snapshot read as stale.
        self.generation.store(generation, Ordering::Release);
        self.snapshot.store(Some(snapshot.clone()));

        let purged = self.subscriptions.purge_stale(generation);
        if purged > 0 {
            debug!(purged, "Dropped interface subscriptions from superseded snapshot");
        }
        self.signals.seed(snapshot.clone(), mark);

        info!(
            generation,
            interfaces = snapshot.interfaces().len(),
            devices = snapshot.devices().len(),
            issues = snapshot.issues().len(),
            "Topology refreshed"
        );
        Ok(snapshot)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if !self.released.load(Ordering::Acquire) {
            self.transport.stop();
            self.signals.shutdown();
        }
    }
}

/// Build a snapshot from raw transport output, recording what could not be read
fn build_snapshot(generation: u64, found: Vec<TransportInterface>) -> TopologySnapshot {
    let mut builder = SnapshotBuilder::new(generation);

    for (position, iface) in found.into_iter().enumerate() {
        let id = match iface.nodes.read_string(names::INTERFACE_ID) {
            Ok(id) => id,
            Err(e) => {
                warn!(position, error = %e, "Skipping interface with unreadable ID");
                builder.report(EnumerationIssue::Interface {
                    position,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let kind = iface
            .nodes
            .read_string(names::INTERFACE_TYPE)
            .map(|v| InterfaceType::from_node_value(&v))
            .unwrap_or_else(|_| InterfaceType::Other("Unknown".to_string()));
        let display_name = iface.nodes.read_string(names::INTERFACE_DISPLAY_NAME).ok();

        let Some(slot) = builder.add_interface(id.clone(), kind, display_name, iface.nodes.clone()) else {
            warn!(interface = %id, "Interface reported twice, keeping the first");
            continue;
        };

        for (index, device) in iface.devices.into_iter().enumerate() {
            match DeviceIdentity::from_nodes(device.as_ref()) {
                Ok(identity) => {
                    let serial = identity.serial;
                    if !builder.add_device(slot, identity, device) {
                        warn!(interface = %id, serial, "Device reported on two interfaces, keeping the first");
                    }
                }
                Err(e) => {
                    warn!(interface = %id, position = index, error = %e, "Skipping device with unreadable identity");
                    builder.report(EnumerationIssue::Device {
                        interface: id.clone(),
                        position: index,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    builder.build()
}

/// Handle to the topology registry
///
/// Clones share one instance. The process-wide instance is reached through
/// [`instance`](Self::instance) or [`initialize`](Self::initialize);
/// [`detached`](Self::detached) builds a private one.
#[derive(Clone)]
pub struct TopologyRegistry {
    pub(crate) shared: Arc<Shared>,
}

impl TopologyRegistry {
    /// Install the process-wide registry over `transport`
    pub fn initialize(transport: Arc<dyn Transport>) -> Result<Self, TopologyError> {
        Self::initialize_with(transport, RegistryOptions::default())
    }

    pub fn initialize_with(
        transport: Arc<dyn Transport>,
        options: RegistryOptions,
    ) -> Result<Self, TopologyError> {
        let mut slot = PROCESS.lock();
        if slot.is_some() {
            return Err(TopologyError::AlreadyInitialized);
        }
        let registry = Self::detached_with(transport, options)?;
        *slot = Some(registry.clone());
        Ok(registry)
    }

    /// The process-wide registry, created over host adapters on first use
    pub fn instance() -> Result<Self, TopologyError> {
        let mut slot = PROCESS.lock();
        if let Some(registry) = slot.as_ref() {
            return Ok(registry.clone());
        }
        let registry = Self::detached(Arc::new(HostTransport::new()))?;
        *slot = Some(registry.clone());
        Ok(registry)
    }

    /// A registry outside the process slot
    pub fn detached(transport: Arc<dyn Transport>) -> Result<Self, TopologyError> {
        Self::detached_with(transport, RegistryOptions::default())
    }

    pub fn detached_with(
        transport: Arc<dyn Transport>,
        options: RegistryOptions,
    ) -> Result<Self, TopologyError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let signals = Arc::new(SignalQueue::new(tx));
        let (events, _) = broadcast::channel(options.broadcast_capacity.max(1));

        let shared = Arc::new(Shared {
            transport,
            snapshot: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
            released: AtomicBool::new(false),
            subscriptions: SubscriptionTable::default(),
            signals: signals.clone(),
            events,
            dispatcher: Mutex::new(None),
        });

        let handle = dispatcher::spawn(Arc::downgrade(&shared), rx).map_err(|e| {
            TopologyError::Enumeration {
                transport: shared.transport.name().to_string(),
                reason: format!("failed to start dispatcher: {}", e),
            }
        })?;
        *shared.dispatcher.lock() = Some(handle);

        shared
            .transport
            .start(EventSink::new(signals))
            .map_err(|e| shared.transport_error(e))?;

        info!(transport = shared.transport.name(), "Topology registry started");
        Ok(Self { shared })
    }

    pub fn transport_name(&self) -> &str {
        self.shared.transport.name()
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }

    /// Generation of the current snapshot, 0 before the first refresh
    pub fn generation(&self) -> u64 {
        self.shared.generation()
    }

    /// Whether both handles refer to the same instance
    pub fn same_instance(&self, other: &TopologyRegistry) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Current snapshot, enumerating first if none was ever taken
    pub fn snapshot(&self) -> Result<Arc<TopologySnapshot>, TopologyError> {
        self.shared.ensure_live()?;
        if let Some(snapshot) = self.shared.snapshot.load_full() {
            return Ok(snapshot);
        }

        let _guard = self.shared.refresh_lock.lock();
        // Another thread may have finished the first refresh while we waited.
        if let Some(snapshot) = self.shared.snapshot.load_full() {
            return Ok(snapshot);
        }
        self.shared.refresh_locked()
    }

    /// Re-enumerate and replace the snapshot
    ///
    /// Every handle issued earlier becomes stale and interface-scoped
    /// subscriptions made through them stop firing. On failure the previous
    /// snapshot remains current.
    pub fn refresh(&self) -> Result<Arc<TopologySnapshot>, TopologyError> {
        let _guard = self.shared.refresh_lock.lock();
        self.shared.refresh_locked()
    }

    pub fn interfaces(&self) -> Result<Vec<InterfaceHandle>, TopologyError> {
        let snapshot = self.snapshot()?;
        Ok((0..snapshot.interfaces().len())
            .map(|position| InterfaceHandle::new(snapshot.clone(), position, self.shared.clone()))
            .collect())
    }

    /// All devices, grouped in interface order
    pub fn devices(&self) -> Result<Vec<DeviceHandle>, TopologyError> {
        let snapshot = self.snapshot()?;
        Ok((0..snapshot.devices().len())
            .map(|position| DeviceHandle::new(snapshot.clone(), position, self.shared.clone()))
            .collect())
    }

    pub fn interface(&self, index: usize) -> Result<InterfaceHandle, TopologyError> {
        let snapshot = self.snapshot()?;
        snapshot.interface(index)?;
        Ok(InterfaceHandle::new(snapshot, index, self.shared.clone()))
    }

    pub fn interface_by_id(&self, id: &str) -> Result<Option<InterfaceHandle>, TopologyError> {
        let snapshot = self.snapshot()?;
        let position = snapshot.interfaces().iter().position(|i| i.identity.id == id);
        Ok(position.map(|p| InterfaceHandle::new(snapshot, p, self.shared.clone())))
    }

    pub fn device_by_serial(&self, serial: u64) -> Result<Option<DeviceHandle>, TopologyError> {
        let snapshot = self.snapshot()?;
        let position = snapshot
            .devices()
            .iter()
            .position(|d| d.identity.serial == serial);
        Ok(position.map(|p| DeviceHandle::new(snapshot, p, self.shared.clone())))
    }

    pub fn system_nodes(&self) -> Result<Arc<dyn NodeMap>, TopologyError> {
        self.shared.ensure_live()?;
        Ok(self.shared.transport.system_nodes())
    }

    pub fn gev_enumeration(&self) -> Result<GevEnumeration, TopologyError> {
        let nodes = self.system_nodes()?;
        let state = match nodes.node(names::ENUMERATE_GEV_INTERFACES) {
            Some(node) if node.is_readable() => match node.as_bool() {
                Ok(true) => GevEnumeration::Enabled,
                Ok(false) => GevEnumeration::Disabled,
                Err(_) => GevEnumeration::Unavailable,
            },
            _ => GevEnumeration::Unavailable,
        };
        Ok(state)
    }

    /// Register a system-scoped subscription
    pub fn register(&self, subscription: EventSubscription) -> Result<Registration, TopologyError> {
        // Serialized with release(), which counts registrations under this lock.
        let _guard = self.shared.refresh_lock.lock();
        self.shared.ensure_live()?;
        if subscription.is_empty() {
            return Err(TopologyError::InvalidSubscription(
                "no callbacks bound".to_string(),
            ));
        }
        let generation = self.shared.generation();
        let id = self
            .shared
            .subscriptions
            .insert(SubscriptionScope::System, generation, subscription);
        debug!(subscription = %id, "System subscription registered");
        Ok(Registration {
            id,
            scope: SubscriptionScope::System,
            generation,
            shared: Arc::downgrade(&self.shared),
            armed: true,
        })
    }

    /// Remove a system-scoped subscription
    pub fn unregister(&self, mut registration: Registration) -> Result<(), TopologyError> {
        let _guard = self.shared.refresh_lock.lock();
        self.shared.ensure_live()?;
        if registration.scope != SubscriptionScope::System {
            return Err(TopologyError::InvalidSubscription(
                "interface subscriptions are removed through their interface handle".to_string(),
            ));
        }
        if !registration.shared.ptr_eq(&Arc::downgrade(&self.shared)) {
            return Err(TopologyError::InvalidSubscription(
                "registration belongs to another registry".to_string(),
            ));
        }
        registration.disarm();
        if !self.shared.subscriptions.remove(registration.id) {
            return Err(TopologyError::InvalidSubscription(format!(
                "subscription {} is not registered",
                registration.id
            )));
        }
        debug!(subscription = %registration.id, "System subscription removed");
        Ok(())
    }

    /// Number of live registrations of either scope
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }

    /// Async stream of every dispatched event
    pub fn subscribe_events(&self) -> broadcast::Receiver<TopologyEvent> {
        self.shared.events.subscribe()
    }

    /// Tear the registry down
    ///
    /// All registrations must have been dropped or unregistered first. Every
    /// later operation on this instance or its handles fails with
    /// `AlreadyReleased`.
    pub fn release(&self) -> Result<(), TopologyError> {
        {
            let _guard = self.shared.refresh_lock.lock();
            self.shared.ensure_live()?;
            let outstanding = self.shared.subscriptions.len();
            if outstanding > 0 {
                return Err(TopologyError::SubscriptionsOutstanding(outstanding));
            }
            self.shared.released.store(true, Ordering::Release);
        }

        self.shared.transport.stop();
        self.shared.signals.shutdown();
        self.shared.snapshot.store(None);

        let handle = self.shared.dispatcher.lock().take();
        if let Some(handle) = handle {
            // A callback releasing the registry cannot wait for its own thread.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Dispatcher thread panicked");
            }
        }

        let mut slot = PROCESS.lock();
        if slot.as_ref().is_some_and(|r| r.same_instance(self)) {
            *slot = None;
        }

        info!(transport = self.shared.transport.name(), "Topology registry released");
        Ok(())
    }
}

impl fmt::Debug for TopologyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyRegistry")
            .field("transport", &self.shared.transport.name())
            .field("generation", &self.generation())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimDevice, SimInterface, SimulatedTransport};
    use camtopo_core::StaticNodeMap;

    fn sim() -> SimulatedTransport {
        let sim = SimulatedTransport::new();
        sim.add_interface(
            SimInterface::gev("eth0")
                .with_device(SimDevice::new(1001))
                .with_device(SimDevice::new(1002)),
        );
        sim.add_interface(SimInterface::usb3("usb0").with_device(SimDevice::new(2001)));
        sim
    }

    #[test]
    fn test_lazy_first_snapshot() {
        let registry = TopologyRegistry::detached(Arc::new(sim())).unwrap();
        assert_eq!(registry.generation(), 0);
        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.generation(), 1);
        // Reads do not refresh again.
        registry.devices().unwrap();
        assert_eq!(registry.generation(), 1);
        registry.release().unwrap();
    }

    #[test]
    fn test_build_snapshot_records_unreadable_items() {
        let good: Arc<dyn NodeMap> = Arc::new(
            StaticNodeMap::new()
                .with_string(names::INTERFACE_ID, "eth0")
                .with_string(names::INTERFACE_TYPE, "GEV"),
        );
        let broken: Arc<dyn NodeMap> = Arc::new(StaticNodeMap::new());
        let camera: Arc<dyn NodeMap> =
            Arc::new(StaticNodeMap::new().with_string(names::DEVICE_SERIAL_NUMBER, "5"));

        let snapshot = build_snapshot(
            4,
            vec![
                TransportInterface {
                    nodes: broken.clone(),
                    devices: Vec::new(),
                },
                TransportInterface {
                    nodes: good,
                    devices: vec![camera, broken],
                },
            ],
        );

        assert_eq!(snapshot.generation(), 4);
        assert_eq!(snapshot.interfaces().len(), 1);
        assert_eq!(snapshot.devices().len(), 1);
        assert_eq!(snapshot.issues().len(), 2);
        assert!(matches!(snapshot.issues()[0], EnumerationIssue::Interface { position: 0, .. }));
        assert!(matches!(
            &snapshot.issues()[1],
            EnumerationIssue::Device { interface, position: 1, .. } if interface == "eth0"
        ));
    }

    #[test]
    fn test_gev_enumeration_state() {
        let sim = sim();
        let registry = TopologyRegistry::detached(Arc::new(sim.clone())).unwrap();
        assert_eq!(registry.gev_enumeration().unwrap(), GevEnumeration::Enabled);
        sim.set_gev_enumeration(Some(false));
        assert_eq!(registry.gev_enumeration().unwrap(), GevEnumeration::Disabled);
        sim.set_gev_enumeration(None);
        assert_eq!(registry.gev_enumeration().unwrap(), GevEnumeration::Unavailable);
        registry.release().unwrap();
    }

    #[test]
    fn test_empty_subscription_rejected() {
        let registry = TopologyRegistry::detached(Arc::new(sim())).unwrap();
        let err = registry.register(EventSubscription::new()).unwrap_err();
        assert!(matches!(err, TopologyError::InvalidSubscription(_)));
        registry.release().unwrap();
    }

    #[test]
    fn test_registration_drop_unregisters() {
        let registry = TopologyRegistry::detached(Arc::new(sim())).unwrap();
        let registration = registry
            .register(EventSubscription::new().on_interface_arrival(|_| {}))
            .unwrap();
        assert!(registration.is_active());
        assert_eq!(registry.subscription_count(), 1);
        drop(registration);
        assert_eq!(registry.subscription_count(), 0);
        registry.release().unwrap();
    }
}
