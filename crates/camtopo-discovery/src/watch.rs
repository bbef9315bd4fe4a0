//! Automatic re-subscription across interface changes
//!
//! A refresh invalidates every interface handle and the subscriptions made
//! through them. [`InterfaceWatch`] listens for interface arrival and
//! removal at system scope and, on each one, refreshes the registry and
//! registers a fresh per-interface subscription against every new handle.

use camtopo_core::{TopologyError, TopologySnapshot};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::handle::InterfaceHandle;
use crate::registry::TopologyRegistry;
use crate::subscription::{EventSubscription, Registration};

type Factory = Arc<dyn Fn(&InterfaceHandle) -> EventSubscription + Send + Sync>;
type Hook = Arc<dyn Fn(&TopologySnapshot) + Send + Sync>;

#[derive(Default)]
struct WatchState {
    watcher: Option<Registration>,
    system: Option<Registration>,
    per_interface: Vec<(InterfaceHandle, Registration)>,
    stopped: bool,
}

struct Inner {
    registry: TopologyRegistry,
    factory: Option<Factory>,
    hook: Option<Hook>,
    state: Mutex<WatchState>,
}

impl Inner {
    /// Register the factory's subscription on every interface of the current snapshot
    fn subscribe_all(&self, state: &mut WatchState) -> Result<(), TopologyError> {
        let Some(factory) = &self.factory else {
            return Ok(());
        };
        for handle in self.registry.interfaces()? {
            let subscription = factory(&handle);
            if subscription.is_empty() {
                continue;
            }
            match handle.register(subscription) {
                Ok(registration) => state.per_interface.push((handle, registration)),
                Err(e) => warn!(interface = %handle.id(), error = %e, "Could not subscribe to interface"),
            }
        }
        Ok(())
    }

    fn resync(&self, cause: &str) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }

        let snapshot = match self.registry.refresh() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(cause, error = %e, "Refresh after interface change failed");
                return;
            }
        };

        // Already purged by the refresh; dropping the guards is a no-op.
        state.per_interface.clear();
        if let Err(e) = self.subscribe_all(&mut state) {
            warn!(error = %e, "Re-subscription after interface change failed");
        }
        info!(
            cause,
            generation = snapshot.generation(),
            interfaces = state.per_interface.len(),
            "Interface subscriptions renewed"
        );
        drop(state);

        if let Some(hook) = &self.hook {
            hook(&snapshot);
        }
    }
}

/// Keeps per-interface subscriptions registered across topology changes
pub struct InterfaceWatch {
    inner: Arc<Inner>,
}

/// Builder for [`InterfaceWatch`]
pub struct InterfaceWatchBuilder {
    registry: TopologyRegistry,
    factory: Option<Factory>,
    system: Option<EventSubscription>,
    hook: Option<Hook>,
}

impl InterfaceWatchBuilder {
    /// Subscription to register on each interface, built per handle
    pub fn per_interface<F>(mut self, factory: F) -> Self
    where
        F: Fn(&InterfaceHandle) -> EventSubscription + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// An additional system-scoped subscription owned by the watch
    pub fn system(mut self, subscription: EventSubscription) -> Self {
        self.system = Some(subscription);
        self
    }

    /// Called with the new snapshot after every renewal
    pub fn on_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TopologySnapshot) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn start(self) -> Result<InterfaceWatch, TopologyError> {
        let inner = Arc::new(Inner {
            registry: self.registry,
            factory: self.factory,
            hook: self.hook,
            state: Mutex::new(WatchState::default()),
        });

        let mut state = inner.state.lock();

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let on_arrival = weak.clone();
        let watcher = EventSubscription::new()
            .on_interface_arrival(move |id| {
                if let Some(inner) = on_arrival.upgrade() {
                    debug!(interface = %id, "Interface arrived, renewing subscriptions");
                    inner.resync("arrival");
                }
            })
            .on_interface_removal(move |id| {
                if let Some(inner) = weak.upgrade() {
                    debug!(interface = %id, "Interface removed, renewing subscriptions");
                    inner.resync("removal");
                }
            });
        // The watcher goes first so user callbacks see renewed state.
        state.watcher = Some(inner.registry.register(watcher)?);
        if let Some(system) = self.system {
            state.system = Some(inner.registry.register(system)?);
        }
        inner.subscribe_all(&mut state)?;
        drop(state);

        Ok(InterfaceWatch { inner })
    }
}

impl InterfaceWatch {
    pub fn builder(registry: &TopologyRegistry) -> InterfaceWatchBuilder {
        InterfaceWatchBuilder {
            registry: registry.clone(),
            factory: None,
            system: None,
            hook: None,
        }
    }

    /// IDs of the interfaces currently subscribed
    pub fn interfaces(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .per_interface
            .iter()
            .map(|(handle, _)| handle.id().to_string())
            .collect()
    }

    /// Unregister everything the watch owns
    ///
    /// Registrations invalidated by a refresh nobody answered are dropped
    /// silently; the first other failure is returned.
    pub fn stop(self) -> Result<(), TopologyError> {
        let mut state = self.inner.state.lock();
        state.stopped = true;
        let mut first_error = None;

        for (handle, registration) in state.per_interface.drain(..) {
            match handle.unregister(registration) {
                Ok(()) => {}
                Err(e) if e.is_stale() => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        for registration in [state.system.take(), state.watcher.take()].into_iter().flatten() {
            if let Err(e) = self.inner.registry.unregister(registration) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimDevice, SimInterface, SimulatedTransport};

    #[test]
    fn test_start_subscribes_every_interface() {
        let sim = SimulatedTransport::new();
        sim.add_interface(SimInterface::gev("eth0"));
        sim.add_interface(SimInterface::gev("eth1").with_device(SimDevice::new(3)));
        let registry = TopologyRegistry::detached(Arc::new(sim)).unwrap();

        let watch = InterfaceWatch::builder(&registry)
            .per_interface(|_| EventSubscription::new().on_device_arrival(|_, _| {}))
            .start()
            .unwrap();
        assert_eq!(watch.interfaces(), vec!["eth0", "eth1"]);
        // watcher + two interfaces
        assert_eq!(registry.subscription_count(), 3);

        watch.stop().unwrap();
        assert_eq!(registry.subscription_count(), 0);
        registry.release().unwrap();
    }

    #[test]
    fn test_empty_factory_output_skipped() {
        let sim = SimulatedTransport::new();
        sim.add_interface(SimInterface::gev("eth0"));
        let registry = TopologyRegistry::detached(Arc::new(sim)).unwrap();

        let watch = InterfaceWatch::builder(&registry)
            .per_interface(|_| EventSubscription::new())
            .system(EventSubscription::new().on_interface_arrival(|_| {}))
            .start()
            .unwrap();
        assert!(watch.interfaces().is_empty());
        assert_eq!(registry.subscription_count(), 2);
        watch.stop().unwrap();
        registry.release().unwrap();
    }
}
