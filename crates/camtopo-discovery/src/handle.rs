//! Interface and device handles
//!
//! Handles are views into the snapshot that produced them. Their data stays
//! readable after a refresh, but operations that act on live hardware or
//! register callbacks fail with `StaleHandle` once a newer snapshot exists.

use camtopo_core::{
    DeviceIdentity, DeviceInfo, DeviceRecord, InterfaceIdentity, InterfaceRecord, InterfaceType,
    NodeMap, TopologyError, TopologySnapshot,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::registry::Shared;
use crate::subscription::{EventSubscription, Registration, SubscriptionScope};

/// A transport interface as seen by one snapshot
#[derive(Clone)]
pub struct InterfaceHandle {
    snapshot: Arc<TopologySnapshot>,
    position: usize,
    shared: Arc<Shared>,
}

impl InterfaceHandle {
    pub(crate) fn new(snapshot: Arc<TopologySnapshot>, position: usize, shared: Arc<Shared>) -> Self {
        Self {
            snapshot,
            position,
            shared,
        }
    }

    fn record(&self) -> &InterfaceRecord {
        &self.snapshot.interfaces()[self.position]
    }

    pub fn identity(&self) -> &InterfaceIdentity {
        &self.record().identity
    }

    pub fn id(&self) -> &str {
        &self.record().identity.id
    }

    /// Position in the producing snapshot
    pub fn index(&self) -> usize {
        self.record().identity.index
    }

    pub fn kind(&self) -> &InterfaceType {
        &self.record().kind
    }

    pub fn display_name(&self) -> Option<&str> {
        self.record().display_name.as_deref()
    }

    pub fn display_label(&self) -> &str {
        self.record().display_label()
    }

    /// Generation of the snapshot this handle came from
    pub fn generation(&self) -> u64 {
        self.snapshot.generation()
    }

    /// Whether a newer snapshot has superseded this handle
    pub fn is_stale(&self) -> bool {
        self.shared.is_released() || self.shared.generation() != self.snapshot.generation()
    }

    /// Identities of the attached devices, in transport order
    pub fn device_identities(&self) -> &[DeviceIdentity] {
        &self.record().devices
    }

    /// Devices attached as of the producing snapshot
    pub fn devices(&self) -> Vec<DeviceHandle> {
        let id = self.id();
        self.snapshot
            .devices()
            .iter()
            .enumerate()
            .filter(|(_, d)| d.interface_id == id)
            .map(|(position, _)| DeviceHandle::new(self.snapshot.clone(), position, self.shared.clone()))
            .collect()
    }

    pub fn device(&self, index: usize) -> Result<DeviceHandle, TopologyError> {
        let mut devices = self.devices();
        let len = devices.len();
        if index >= len {
            return Err(TopologyError::IndexOutOfRange { index, len });
        }
        Ok(devices.swap_remove(index))
    }

    /// Transport-layer node map of the interface
    pub fn nodes(&self) -> Arc<dyn NodeMap> {
        self.record().nodes.clone()
    }

    fn ensure_current(&self) -> Result<(), TopologyError> {
        self.shared.ensure_live()?;
        let current = self.shared.generation();
        if current != self.snapshot.generation() {
            return Err(TopologyError::StaleHandle {
                interface: self.id().to_string(),
                generation: self.snapshot.generation(),
                current,
            });
        }
        Ok(())
    }

    /// Execute a command node on the interface, e.g. `AutoForceIP`
    pub fn execute(&self, command: &str) -> Result<(), TopologyError> {
        self.ensure_current()?;
        debug!(interface = %self.id(), command, "Executing interface command");
        self.record().nodes.execute(command)?;
        Ok(())
    }

    /// Register device callbacks scoped to this interface
    ///
    /// The registration only fires while this handle's snapshot is current.
    /// Interface arrival/removal callbacks belong at system scope.
    pub fn register(&self, subscription: EventSubscription) -> Result<Registration, TopologyError> {
        // Holding the refresh lock keeps the generation check and the insert atomic.
        let _guard = self.shared.refresh_lock.lock();
        self.ensure_current()?;

        if subscription.is_empty() {
            return Err(TopologyError::InvalidSubscription(
                "no callbacks bound".to_string(),
            ));
        }
        if subscription.kinds().iter().any(|k| k.is_interface_level()) {
            return Err(TopologyError::InvalidSubscription(
                "interface arrival/removal callbacks must be registered at system scope".to_string(),
            ));
        }

        let scope = SubscriptionScope::Interface(self.id().to_string());
        let generation = self.snapshot.generation();
        let id = self
            .shared
            .subscriptions
            .insert(scope.clone(), generation, subscription);
        debug!(interface = %self.id(), subscription = %id, generation, "Interface subscription registered");

        Ok(Registration {
            id,
            scope,
            generation,
            shared: Arc::downgrade(&self.shared),
            armed: true,
        })
    }

    /// Remove a subscription made through this interface
    pub fn unregister(&self, mut registration: Registration) -> Result<(), TopologyError> {
        let _guard = self.shared.refresh_lock.lock();
        match &registration.scope {
            SubscriptionScope::Interface(id) if id == self.id() => {}
            _ => {
                return Err(TopologyError::InvalidSubscription(format!(
                    "registration does not belong to interface {}",
                    self.id()
                )))
            }
        }
        self.ensure_current()?;
        if registration.generation != self.snapshot.generation() {
            return Err(TopologyError::StaleHandle {
                interface: self.id().to_string(),
                generation: registration.generation,
                current: self.snapshot.generation(),
            });
        }

        registration.disarm();
        if !self.shared.subscriptions.remove(registration.id) {
            return Err(TopologyError::InvalidSubscription(format!(
                "subscription {} is not registered",
                registration.id
            )));
        }
        debug!(interface = %self.id(), subscription = %registration.id, "Interface subscription removed");
        Ok(())
    }
}

impl fmt::Debug for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceHandle")
            .field("identity", self.identity())
            .field("kind", self.kind())
            .field("generation", &self.generation())
            .finish()
    }
}

/// A device as seen by one snapshot
#[derive(Clone)]
pub struct DeviceHandle {
    snapshot: Arc<TopologySnapshot>,
    position: usize,
    shared: Arc<Shared>,
}

impl DeviceHandle {
    pub(crate) fn new(snapshot: Arc<TopologySnapshot>, position: usize, shared: Arc<Shared>) -> Self {
        Self {
            snapshot,
            position,
            shared,
        }
    }

    fn record(&self) -> &DeviceRecord {
        &self.snapshot.devices()[self.position]
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.record().identity
    }

    pub fn serial(&self) -> u64 {
        self.record().identity.serial
    }

    pub fn interface_id(&self) -> &str {
        &self.record().interface_id
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation()
    }

    pub fn is_stale(&self) -> bool {
        self.shared.is_released() || self.shared.generation() != self.snapshot.generation()
    }

    /// Transport-layer node map, readable without opening the device
    pub fn tl_nodes(&self) -> Arc<dyn NodeMap> {
        self.record().nodes.clone()
    }

    /// Transport-layer information; missing nodes leave fields empty
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo::from_tl_nodes(self.record().nodes.as_ref())
    }

    /// Open the device and return its device node map
    pub fn open(&self) -> Result<Arc<dyn NodeMap>, TopologyError> {
        self.shared.ensure_live()?;
        let current = self.shared.generation();
        if current != self.snapshot.generation() {
            return Err(TopologyError::StaleHandle {
                interface: self.interface_id().to_string(),
                generation: self.snapshot.generation(),
                current,
            });
        }
        self.shared
            .transport
            .open_device(self.serial())
            .map_err(|e| self.shared.transport_error(e))
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("identity", self.identity())
            .field("interface", &self.interface_id())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::registry::TopologyRegistry;
    use crate::simulated::{SimDevice, SimInterface, SimulatedTransport};
    use crate::subscription::EventSubscription;
    use camtopo_core::{names, TopologyError};
    use std::sync::Arc;

    fn registry() -> (SimulatedTransport, TopologyRegistry) {
        let sim = SimulatedTransport::new();
        sim.add_interface(
            SimInterface::gev("eth0")
                .with_device(SimDevice::new(11))
                .with_device(SimDevice::new(12)),
        );
        sim.add_interface(SimInterface::gev("eth1"));
        let registry = TopologyRegistry::detached(Arc::new(sim.clone())).unwrap();
        (sim, registry)
    }

    #[test]
    fn test_device_index_bounds() {
        let (_sim, registry) = registry();
        let eth0 = registry.interface(0).unwrap();
        assert_eq!(eth0.devices().len(), 2);
        assert_eq!(eth0.device(1).unwrap().serial(), 12);
        assert_eq!(
            eth0.device(2).unwrap_err(),
            TopologyError::IndexOutOfRange { index: 2, len: 2 }
        );
        assert_eq!(
            registry.interface(5).unwrap_err(),
            TopologyError::IndexOutOfRange { index: 5, len: 2 }
        );
        registry.release().unwrap();
    }

    #[test]
    fn test_stale_handle_keeps_data() {
        let (_sim, registry) = registry();
        let eth0 = registry.interface(0).unwrap();
        registry.refresh().unwrap();

        assert!(eth0.is_stale());
        assert_eq!(eth0.id(), "eth0");
        assert_eq!(eth0.devices().len(), 2);
        let err = eth0
            .register(EventSubscription::new().on_device_arrival(|_, _| {}))
            .unwrap_err();
        assert!(err.is_stale());
        assert!(eth0.execute(names::AUTO_FORCE_IP).unwrap_err().is_stale());
        assert!(eth0.device(0).unwrap().open().unwrap_err().is_stale());
        registry.release().unwrap();
    }

    #[test]
    fn test_interface_scope_rejects_interface_callbacks() {
        let (_sim, registry) = registry();
        let eth0 = registry.interface(0).unwrap();
        let err = eth0
            .register(EventSubscription::new().on_interface_removal(|_| {}))
            .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidSubscription(_)));
        registry.release().unwrap();
    }

    #[test]
    fn test_unregister_checks_owner() {
        let (_sim, registry) = registry();
        let eth0 = registry.interface(0).unwrap();
        let eth1 = registry.interface(1).unwrap();
        let registration = eth0
            .register(EventSubscription::new().on_device_removal(|_, _| {}))
            .unwrap();
        let id = registration.id();

        let err = eth1.unregister(registration).unwrap_err();
        assert!(matches!(err, TopologyError::InvalidSubscription(_)));
        // The failed unregister consumed the guard, which removed it on drop.
        assert_eq!(registry.subscription_count(), 0);

        let registration = eth0
            .register(EventSubscription::new().on_device_removal(|_, _| {}))
            .unwrap();
        assert_ne!(registration.id(), id);
        eth0.unregister(registration).unwrap();
        registry.release().unwrap();
    }

    #[test]
    fn test_unregister_stale_registration() {
        let (_sim, registry) = registry();
        let eth0 = registry.interface(0).unwrap();
        let registration = eth0
            .register(EventSubscription::new().on_device_arrival(|_, _| {}))
            .unwrap();
        registry.refresh().unwrap();
        assert!(!registration.is_active());

        let fresh = registry.interface(0).unwrap();
        assert!(fresh.unregister(registration).unwrap_err().is_stale());
        registry.release().unwrap();
    }
}
