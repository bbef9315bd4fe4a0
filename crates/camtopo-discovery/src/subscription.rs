//! Event subscriptions and their registrations
//!
//! An [`EventSubscription`] is a set of up to four callback bindings. It can
//! be built from closures, from handler objects implementing the capability
//! traits, or from plain function pointers with a context value. Registering
//! it yields a [`Registration`] guard: dropping the guard unregisters quietly,
//! while `unregister` on the owner reports errors.

use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::registry::Shared;
use crate::transport::TopologyEvent;

pub trait DeviceArrivalHandler: Send + Sync {
    fn on_device_arrival(&self, serial: u64, interface_id: &str);
}

pub trait DeviceRemovalHandler: Send + Sync {
    fn on_device_removal(&self, serial: u64, interface_id: &str);
}

pub trait InterfaceArrivalHandler: Send + Sync {
    fn on_interface_arrival(&self, interface_id: &str);
}

pub trait InterfaceRemovalHandler: Send + Sync {
    fn on_interface_removal(&self, interface_id: &str);
}

/// Device arrival and removal on one interface
pub trait InterfaceEventHandler: DeviceArrivalHandler + DeviceRemovalHandler {}

impl<T: DeviceArrivalHandler + DeviceRemovalHandler> InterfaceEventHandler for T {}

/// Interface arrival and removal across the system
pub trait SystemEventHandler: InterfaceArrivalHandler + InterfaceRemovalHandler {}

impl<T: InterfaceArrivalHandler + InterfaceRemovalHandler> SystemEventHandler for T {}

/// The four kinds of callback a subscription can bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    DeviceArrival,
    DeviceRemoval,
    InterfaceArrival,
    InterfaceRemoval,
}

impl CallbackKind {
    pub fn of(event: &TopologyEvent) -> Self {
        match event {
            TopologyEvent::DeviceArrival { .. } => Self::DeviceArrival,
            TopologyEvent::DeviceRemoval { .. } => Self::DeviceRemoval,
            TopologyEvent::InterfaceArrival { .. } => Self::InterfaceArrival,
            TopologyEvent::InterfaceRemoval { .. } => Self::InterfaceRemoval,
        }
    }

    pub fn is_interface_level(&self) -> bool {
        matches!(self, Self::InterfaceArrival | Self::InterfaceRemoval)
    }
}

type DeviceCallback = Arc<dyn Fn(u64, &str) + Send + Sync>;
type InterfaceCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A set of callback bindings
#[derive(Clone, Default)]
pub struct EventSubscription {
    device_arrival: Option<DeviceCallback>,
    device_removal: Option<DeviceCallback>,
    interface_arrival: Option<InterfaceCallback>,
    interface_removal: Option<InterfaceCallback>,
}

impl EventSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_device_arrival<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, &str) + Send + Sync + 'static,
    {
        self.device_arrival = Some(Arc::new(f));
        self
    }

    pub fn on_device_removal<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, &str) + Send + Sync + 'static,
    {
        self.device_removal = Some(Arc::new(f));
        self
    }

    pub fn on_interface_arrival<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.interface_arrival = Some(Arc::new(f));
        self
    }

    pub fn on_interface_removal<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.interface_removal = Some(Arc::new(f));
        self
    }

    // Handler objects

    pub fn with_device_arrival_handler<H: DeviceArrivalHandler + 'static>(self, handler: Arc<H>) -> Self {
        self.on_device_arrival(move |serial, iface| handler.on_device_arrival(serial, iface))
    }

    pub fn with_device_removal_handler<H: DeviceRemovalHandler + 'static>(self, handler: Arc<H>) -> Self {
        self.on_device_removal(move |serial, iface| handler.on_device_removal(serial, iface))
    }

    pub fn with_interface_arrival_handler<H: InterfaceArrivalHandler + 'static>(
        self,
        handler: Arc<H>,
    ) -> Self {
        self.on_interface_arrival(move |iface| handler.on_interface_arrival(iface))
    }

    pub fn with_interface_removal_handler<H: InterfaceRemovalHandler + 'static>(
        self,
        handler: Arc<H>,
    ) -> Self {
        self.on_interface_removal(move |iface| handler.on_interface_removal(iface))
    }

    /// Bind both device callbacks of one handler
    pub fn device_events<H: InterfaceEventHandler + 'static>(handler: Arc<H>) -> Self {
        Self::new()
            .with_device_arrival_handler(handler.clone())
            .with_device_removal_handler(handler)
    }

    /// Bind both interface callbacks of one handler
    pub fn interface_events<H: SystemEventHandler + 'static>(handler: Arc<H>) -> Self {
        Self::new()
            .with_interface_arrival_handler(handler.clone())
            .with_interface_removal_handler(handler)
    }

    // Function pointer + context. The context is handed back on every call.

    pub fn device_arrival_fn<C>(callback: fn(u64, &str, &C), context: C) -> Self
    where
        C: Send + Sync + 'static,
    {
        Self::new().on_device_arrival(move |serial, iface| callback(serial, iface, &context))
    }

    pub fn device_removal_fn<C>(callback: fn(u64, &str, &C), context: C) -> Self
    where
        C: Send + Sync + 'static,
    {
        Self::new().on_device_removal(move |serial, iface| callback(serial, iface, &context))
    }

    pub fn interface_arrival_fn<C>(callback: fn(&str, &C), context: C) -> Self
    where
        C: Send + Sync + 'static,
    {
        Self::new().on_interface_arrival(move |iface| callback(iface, &context))
    }

    pub fn interface_removal_fn<C>(callback: fn(&str, &C), context: C) -> Self
    where
        C: Send + Sync + 'static,
    {
        Self::new().on_interface_removal(move |iface| callback(iface, &context))
    }

    /// Bound callback kinds
    pub fn kinds(&self) -> Vec<CallbackKind> {
        let mut kinds = Vec::with_capacity(4);
        if self.device_arrival.is_some() {
            kinds.push(CallbackKind::DeviceArrival);
        }
        if self.device_removal.is_some() {
            kinds.push(CallbackKind::DeviceRemoval);
        }
        if self.interface_arrival.is_some() {
            kinds.push(CallbackKind::InterfaceArrival);
        }
        if self.interface_removal.is_some() {
            kinds.push(CallbackKind::InterfaceRemoval);
        }
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }

    pub fn binds(&self, kind: CallbackKind) -> bool {
        match kind {
            CallbackKind::DeviceArrival => self.device_arrival.is_some(),
            CallbackKind::DeviceRemoval => self.device_removal.is_some(),
            CallbackKind::InterfaceArrival => self.interface_arrival.is_some(),
            CallbackKind::InterfaceRemoval => self.interface_removal.is_some(),
        }
    }

    /// Invoke the binding for `event`, if any
    pub(crate) fn deliver(&self, event: &TopologyEvent) {
        match event {
            TopologyEvent::DeviceArrival { interface_id, serial } => {
                if let Some(cb) = &self.device_arrival {
                    cb(*serial, interface_id);
                }
            }
            TopologyEvent::DeviceRemoval { interface_id, serial } => {
                if let Some(cb) = &self.device_removal {
                    cb(*serial, interface_id);
                }
            }
            TopologyEvent::InterfaceArrival { interface_id } => {
                if let Some(cb) = &self.interface_arrival {
                    cb(interface_id);
                }
            }
            TopologyEvent::InterfaceRemoval { interface_id } => {
                if let Some(cb) = &self.interface_removal {
                    cb(interface_id);
                }
            }
        }
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Unique ID of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a subscription is attached
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionScope {
    System,
    Interface(String),
}

/// A registered subscription
pub(crate) struct Entry {
    pub id: SubscriptionId,
    pub scope: SubscriptionScope,
    /// Snapshot generation an interface-scoped entry was registered against
    pub generation: u64,
    pub subscription: EventSubscription,
}

impl Entry {
    /// Whether this entry should see `event` while `current` is the live generation
    pub fn wants(&self, event: &TopologyEvent, current: u64) -> bool {
        if !self.subscription.binds(CallbackKind::of(event)) {
            return false;
        }
        match &self.scope {
            SubscriptionScope::System => true,
            SubscriptionScope::Interface(id) => {
                event.is_device_event() && id == event.interface_id() && self.generation == current
            }
        }
    }
}

/// Registration table shared by the registry and the dispatcher
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: RwLock<Vec<Arc<Entry>>>,
}

impl SubscriptionTable {
    pub fn insert(
        &self,
        scope: SubscriptionScope,
        generation: u64,
        subscription: EventSubscription,
    ) -> SubscriptionId {
        let id = SubscriptionId::generate();
        self.entries.write().push(Arc::new(Entry {
            id,
            scope,
            generation,
            subscription,
        }));
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.read().iter().any(|e| e.id == id)
    }

    /// Entries that should receive `event`, in registration order
    pub fn matching(&self, event: &TopologyEvent, current: u64) -> Vec<Arc<Entry>> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.wants(event, current))
            .cloned()
            .collect()
    }

    /// Drop interface-scoped entries older than `generation`, returning how many
    pub fn purge_stale(&self, generation: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.scope == SubscriptionScope::System || e.generation >= generation);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Guard for a registered subscription
///
/// Dropping the guard removes the subscription if the registry still exists.
/// Use `TopologyRegistry::unregister` or `InterfaceHandle::unregister` to
/// unregister with error reporting.
#[must_use = "dropping a Registration unregisters it"]
pub struct Registration {
    pub(crate) id: SubscriptionId,
    pub(crate) scope: SubscriptionScope,
    pub(crate) generation: u64,
    pub(crate) shared: Weak<Shared>,
    pub(crate) armed: bool,
}

impl Registration {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    /// Snapshot generation the registration was made against
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the dispatcher can still deliver to this registration
    pub fn is_active(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| !shared.is_released() && shared.subscriptions.contains(self.id))
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.subscriptions.remove(self.id);
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    fn device_arrival(iface: &str, serial: u64) -> TopologyEvent {
        TopologyEvent::DeviceArrival {
            interface_id: iface.to_string(),
            serial,
        }
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl DeviceArrivalHandler for Recorder {
        fn on_device_arrival(&self, serial: u64, interface_id: &str) {
            self.seen.lock().unwrap().push(format!("+{}@{}", serial, interface_id));
        }
    }

    impl DeviceRemovalHandler for Recorder {
        fn on_device_removal(&self, serial: u64, interface_id: &str) {
            self.seen.lock().unwrap().push(format!("-{}@{}", serial, interface_id));
        }
    }

    #[test]
    fn test_handler_object_binding() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let sub = EventSubscription::device_events(recorder.clone());
        assert_eq!(sub.kinds(), vec![CallbackKind::DeviceArrival, CallbackKind::DeviceRemoval]);

        sub.deliver(&device_arrival("eth0", 7));
        sub.deliver(&TopologyEvent::DeviceRemoval {
            interface_id: "eth0".to_string(),
            serial: 7,
        });
        sub.deliver(&TopologyEvent::InterfaceArrival {
            interface_id: "eth1".to_string(),
        });

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["+7@eth0", "-7@eth0"]);
    }

    fn count_arrival(serial: u64, _iface: &str, total: &Arc<AtomicU64>) {
        total.fetch_add(serial, Ordering::SeqCst);
    }

    #[test]
    fn test_function_pointer_context_passed_back() {
        let total = Arc::new(AtomicU64::new(0));
        let sub = EventSubscription::device_arrival_fn(count_arrival, total.clone());
        assert_eq!(sub.kinds(), vec![CallbackKind::DeviceArrival]);

        sub.deliver(&device_arrival("eth0", 5));
        sub.deliver(&device_arrival("eth0", 6));
        assert_eq!(total.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_empty_subscription() {
        assert!(EventSubscription::new().is_empty());
        assert!(!EventSubscription::new().on_interface_arrival(|_| {}).is_empty());
    }

    #[test]
    fn test_interface_scope_filters() {
        let table = SubscriptionTable::default();
        table.insert(
            SubscriptionScope::Interface("eth0".to_string()),
            3,
            EventSubscription::new().on_device_arrival(|_, _| {}),
        );
        table.insert(
            SubscriptionScope::System,
            0,
            EventSubscription::new()
                .on_device_arrival(|_, _| {})
                .on_interface_arrival(|_| {}),
        );

        assert_eq!(table.matching(&device_arrival("eth0", 1), 3).len(), 2);
        assert_eq!(table.matching(&device_arrival("eth1", 1), 3).len(), 1);
        // Interface-scoped entries from older generations never fire.
        assert_eq!(table.matching(&device_arrival("eth0", 1), 4).len(), 1);
        let arrival = TopologyEvent::InterfaceArrival {
            interface_id: "eth0".to_string(),
        };
        assert_eq!(table.matching(&arrival, 3).len(), 1);
    }

    #[test]
    fn test_purge_keeps_system_scope() {
        let table = SubscriptionTable::default();
        let system = table.insert(SubscriptionScope::System, 0, EventSubscription::new());
        let old = table.insert(
            SubscriptionScope::Interface("eth0".to_string()),
            1,
            EventSubscription::new(),
        );
        let fresh = table.insert(
            SubscriptionScope::Interface("eth0".to_string()),
            2,
            EventSubscription::new(),
        );

        assert_eq!(table.purge_stale(2), 1);
        assert!(table.contains(system));
        assert!(!table.contains(old));
        assert!(table.contains(fresh));
        assert!(table.remove(fresh));
        assert!(!table.remove(fresh));
        assert_eq!(table.len(), 1);
    }
}
