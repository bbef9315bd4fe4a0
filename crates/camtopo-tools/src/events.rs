//! Printing handlers for `enumeration-events`

use camtopo_core::TopologyError;
use camtopo_discovery::{
    DeviceArrivalHandler, DeviceRemovalHandler, EventSubscription, GevEnumeration,
    InterfaceArrivalHandler, InterfaceRemovalHandler, InterfaceWatch, TopologyRegistry,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::console::Console;

/// Startup message for the state of GEV enumeration
pub fn gev_notice(state: GevEnumeration) -> &'static str {
    match state {
        GevEnumeration::Enabled => "EnumerateGEVInterfaces is enabled. Continuing..",
        GevEnumeration::Disabled => {
            "\nWARNING: GEV Enumeration is disabled.\n\
             If you intend to use GigE cameras set EnumerateGEVInterfaces to true\n\
             and relaunch your application.\n"
        }
        GevEnumeration::Unavailable => "EnumerateGEVInterfaces node is unavailable",
    }
}

/// Reports device events on one interface
struct InterfacePrinter {
    interface_id: String,
    console: Console,
}

impl DeviceArrivalHandler for InterfacePrinter {
    fn on_device_arrival(&self, serial: u64, _interface_id: &str) {
        self.console.print(&format!(
            "Interface event handler:\n\tDevice {} has arrived on interface {}.\n",
            serial, self.interface_id
        ));
    }
}

impl DeviceRemovalHandler for InterfacePrinter {
    fn on_device_removal(&self, serial: u64, _interface_id: &str) {
        self.console.print(&format!(
            "Interface event handler:\n\tDevice {} was removed from interface {}.\n",
            serial, self.interface_id
        ));
    }
}

/// Keeps the system-wide device count across events
struct DeviceTally {
    serials: Mutex<BTreeSet<u64>>,
    console: Console,
}

impl DeviceTally {
    fn reseed(&self, serials: BTreeSet<u64>) {
        *self.serials.lock() = serials;
    }

    fn report(&self, count: usize) {
        let (verb, noun) = if count == 1 { ("is", "device") } else { ("are", "devices") };
        self.console.print(&format!(
            "Generic interface event handler:\n\tThere {} {} {} on the system.\n",
            verb, count, noun
        ));
    }
}

impl DeviceArrivalHandler for DeviceTally {
    fn on_device_arrival(&self, serial: u64, _interface_id: &str) {
        let count = {
            let mut serials = self.serials.lock();
            serials.insert(serial);
            serials.len()
        };
        self.report(count);
    }
}

impl DeviceRemovalHandler for DeviceTally {
    fn on_device_removal(&self, serial: u64, _interface_id: &str) {
        let count = {
            let mut serials = self.serials.lock();
            serials.remove(&serial);
            serials.len()
        };
        self.report(count);
    }
}

/// Reports interface arrival and removal
struct SystemPrinter {
    registry: TopologyRegistry,
    console: Console,
}

impl InterfaceArrivalHandler for SystemPrinter {
    fn on_interface_arrival(&self, interface_id: &str) {
        let mut text = format!(
            "System event handler:\n\tInterface {} has arrived on the system.\n",
            interface_id
        );
        // Subscriptions were renewed before this runs, so the snapshot already has the interface.
        match self.registry.interface_by_id(interface_id) {
            Ok(Some(handle)) => {
                for device in handle.device_identities() {
                    text.push_str(&format!(
                        "\n\tDevice {} is connected to interface {}.\n",
                        device.serial, interface_id
                    ));
                }
            }
            Ok(None) => {}
            Err(e) => debug!(interface = %interface_id, error = %e, "Interface lookup failed"),
        }
        self.console.print(&text);
    }
}

impl InterfaceRemovalHandler for SystemPrinter {
    fn on_interface_removal(&self, interface_id: &str) {
        self.console.print(&format!(
            "System event handler:\n\tInterface {} was removed from the system.\n",
            interface_id
        ));
    }
}

/// Register the printing handlers and keep them attached across interface changes
pub fn start_watch(
    registry: &TopologyRegistry,
    console: &Console,
) -> Result<InterfaceWatch, TopologyError> {
    let snapshot = registry.snapshot()?;
    let tally = Arc::new(DeviceTally {
        serials: Mutex::new(snapshot.serials()),
        console: console.clone(),
    });
    let system = EventSubscription::interface_events(Arc::new(SystemPrinter {
        registry: registry.clone(),
        console: console.clone(),
    }))
    .with_device_arrival_handler(tally.clone())
    .with_device_removal_handler(tally.clone());

    let per_interface = console.clone();
    let watch = InterfaceWatch::builder(registry)
        .system(system)
        .per_interface(move |handle| {
            EventSubscription::device_events(Arc::new(InterfacePrinter {
                interface_id: handle.id().to_string(),
                console: per_interface.clone(),
            }))
        })
        .on_change(move |snapshot| {
            debug!(
                generation = snapshot.generation(),
                interfaces = snapshot.interfaces().len(),
                "Interface handlers renewed"
            );
            tally.reseed(snapshot.serials());
        })
        .start()?;

    for (index, id) in watch.interfaces().iter().enumerate() {
        console.print(&format!("Event handler registered to interface {} ({})...", index, id));
    }
    console.print("");
    Ok(watch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Captured;
    use camtopo_discovery::{SimDevice, SimInterface, SimulatedTransport};
    use std::time::{Duration, Instant};

    fn wait_for(captured: &Captured, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let text = captured.text();
            if text.contains(needle) || Instant::now() > deadline {
                return text;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_prints_device_and_interface_events() {
        let sim = SimulatedTransport::new();
        sim.add_interface(SimInterface::gev("eth0").with_device(SimDevice::new(100)));
        let registry = TopologyRegistry::detached(Arc::new(sim.clone())).unwrap();
        let captured = Captured::default();
        let console = Console::new(captured.clone());

        let watch = start_watch(&registry, &console).unwrap();
        assert!(captured.text().contains("Event handler registered to interface 0 (eth0)..."));

        sim.attach_device("eth0", SimDevice::new(101));
        let text = wait_for(&captured, "Device 101 has arrived on interface eth0.");
        assert!(text.contains("Device 101 has arrived on interface eth0."));
        assert!(text.contains("There are 2 devices on the system."));

        sim.add_interface(SimInterface::gev("eth1").with_device(SimDevice::new(300)));
        let text = wait_for(&captured, "Device 300 is connected to interface eth1.");
        assert!(text.contains("Interface eth1 has arrived on the system."));
        assert!(text.contains("Device 300 is connected to interface eth1."));

        sim.remove_interface("eth0");
        let text = wait_for(&captured, "Interface eth0 was removed from the system.");
        let removal = text.find("Device 101 was removed from interface eth0.").unwrap();
        let gone = text.find("Interface eth0 was removed from the system.").unwrap();
        assert!(removal < gone);

        watch.stop().unwrap();
        registry.release().unwrap();
    }

    #[test]
    fn test_gev_notice() {
        assert!(gev_notice(GevEnumeration::Enabled).contains("enabled"));
        assert!(gev_notice(GevEnumeration::Disabled).contains("WARNING"));
    }
}
