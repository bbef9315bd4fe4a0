//! In-memory transport
//!
//! Holds a mutable topology and emits hot-plug events as it is changed, so
//! the registry and the tools can be exercised without camera hardware.
//! Topologies can be built in code or loaded from a TOML fixture.

use camtopo_core::{names, MacAddress, NodeMap, NodeValue, NodeAccess, StaticNodeMap};
use parking_lot::Mutex;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::transport::{EventSink, TopologyEvent, Transport, TransportError, TransportInterface};

fn default_interface_type() -> String {
    "GEV".to_string()
}

fn default_true() -> bool {
    true
}

fn default_vendor() -> String {
    "Simulated".to_string()
}

fn default_model() -> String {
    "Virtual Camera".to_string()
}

/// A simulated camera
#[derive(Debug, Clone, Deserialize)]
pub struct SimDevice {
    pub serial: u64,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub subnet_mask: Option<Ipv4Addr>,
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub mac: Option<MacAddress>,
    #[serde(default)]
    pub persistent_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub persistent_subnet_mask: Option<Ipv4Addr>,
    #[serde(default)]
    pub persistent_gateway: Option<Ipv4Addr>,
    /// Whether the address is valid on the adapter subnet
    #[serde(default = "default_true")]
    pub reachable: bool,
}

impl SimDevice {
    pub fn new(serial: u64) -> Self {
        Self {
            serial,
            vendor: default_vendor(),
            model: default_model(),
            ip: None,
            subnet_mask: None,
            gateway: None,
            mac: None,
            persistent_ip: None,
            persistent_subnet_mask: None,
            persistent_gateway: None,
            reachable: true,
        }
    }

    pub fn with_model(mut self, vendor: &str, model: &str) -> Self {
        self.vendor = vendor.to_string();
        self.model = model.to_string();
        self
    }

    pub fn with_address(mut self, ip: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        self.ip = Some(ip);
        self.subnet_mask = Some(mask);
        self.gateway = Some(gateway);
        self
    }

    pub fn with_mac(mut self, mac: MacAddress) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Mark the device as sitting outside its adapter's subnet
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    fn tl_nodes(&self) -> StaticNodeMap {
        let mut nodes = StaticNodeMap::new()
            .with_string(names::DEVICE_SERIAL_NUMBER, self.serial.to_string())
            .with_string(names::DEVICE_VENDOR_NAME, self.vendor.clone())
            .with_string(names::DEVICE_MODEL_NAME, self.model.clone());
        let addresses = [
            (names::GEV_DEVICE_IP_ADDRESS, self.ip),
            (names::GEV_DEVICE_SUBNET_MASK, self.subnet_mask),
            (names::GEV_DEVICE_GATEWAY, self.gateway),
        ];
        for (name, value) in addresses {
            if let Some(addr) = value {
                nodes = nodes.with_integer(name, i64::from(u32::from(addr)));
            }
        }
        if let Some(mac) = self.mac {
            nodes = nodes.with_integer(names::GEV_DEVICE_MAC_ADDRESS, mac.as_u64() as i64);
        }
        nodes
    }

    fn device_nodes(&self) -> StaticNodeMap {
        let nodes = self.tl_nodes();
        let persistent = [
            (names::GEV_PERSISTENT_IP_ADDRESS, self.persistent_ip.or(self.ip)),
            (names::GEV_PERSISTENT_SUBNET_MASK, self.persistent_subnet_mask.or(self.subnet_mask)),
            (names::GEV_PERSISTENT_DEFAULT_GATEWAY, self.persistent_gateway.or(self.gateway)),
        ];
        for (name, value) in persistent {
            if let Some(addr) = value {
                nodes.set(name, NodeValue::Integer(i64::from(u32::from(addr))), NodeAccess::READ_WRITE);
            }
        }
        nodes
    }
}

/// A simulated transport interface
#[derive(Debug, Clone, Deserialize)]
pub struct SimInterface {
    pub id: String,
    #[serde(rename = "type", default = "default_interface_type")]
    pub kind: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Adapter address used when forcing device IPs
    #[serde(default)]
    pub address: Option<Ipv4Addr>,
    #[serde(default)]
    pub subnet_mask: Option<Ipv4Addr>,
    /// Whether the `AutoForceIP` command node exists
    #[serde(default = "default_true")]
    pub auto_force_ip: bool,
    #[serde(default, rename = "device")]
    pub devices: Vec<SimDevice>,
}

impl SimInterface {
    pub fn new(id: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            display_name: None,
            address: None,
            subnet_mask: None,
            auto_force_ip: true,
            devices: Vec::new(),
        }
    }

    pub fn gev(id: &str) -> Self {
        Self::new(id, "GEV")
    }

    pub fn usb3(id: &str) -> Self {
        let mut iface = Self::new(id, "U3V");
        iface.auto_force_ip = false;
        iface
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn with_subnet(mut self, address: Ipv4Addr, mask: Ipv4Addr) -> Self {
        self.address = Some(address);
        self.subnet_mask = Some(mask);
        self
    }

    pub fn without_auto_force_ip(mut self) -> Self {
        self.auto_force_ip = false;
        self
    }

    pub fn with_device(mut self, device: SimDevice) -> Self {
        self.devices.push(device);
        self
    }
}

struct SimState {
    interfaces: Vec<SimInterface>,
    gev_enumeration: Option<bool>,
    available: bool,
    sink: Option<EventSink>,
    force_ip_runs: usize,
}

impl SimState {
    fn emit(&self, event: TopologyEvent) {
        if let Some(sink) = &self.sink {
            debug!(event = %event, "Simulated hot-plug event");
            sink.emit(event);
        }
    }

    fn owner_of(&self, serial: u64) -> Option<usize> {
        self.interfaces
            .iter()
            .position(|i| i.devices.iter().any(|d| d.serial == serial))
    }

    fn device(&self, serial: u64) -> Option<&SimDevice> {
        self.interfaces
            .iter()
            .flat_map(|i| i.devices.iter())
            .find(|d| d.serial == serial)
    }

    /// Move every unreachable device on `interface_id` onto the adapter subnet
    fn force_ip(&mut self, interface_id: &str) -> Result<(), String> {
        let iface = self
            .interfaces
            .iter_mut()
            .find(|i| i.id == interface_id)
            .ok_or_else(|| format!("interface {} is gone", interface_id))?;

        let network = match (iface.address, iface.subnet_mask) {
            (Some(addr), Some(mask)) => Some((u32::from(addr) & u32::from(mask), mask)),
            _ => None,
        };
        for (idx, device) in iface.devices.iter_mut().enumerate() {
            if device.reachable {
                continue;
            }
            if let Some((base, mask)) = network {
                let host = (100 + idx as u32) & !u32::from(mask);
                device.ip = Some(Ipv4Addr::from(base | host));
                device.subnet_mask = Some(mask);
            }
            device.reachable = true;
        }
        self.force_ip_runs += 1;
        Ok(())
    }
}

/// Transport over an in-memory topology
///
/// Clones share state: keep one clone to drive hot-plug changes while the
/// registry owns another.
#[derive(Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl std::fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedTransport").finish_non_exhaustive()
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::from_interfaces(Vec::new(), Some(true))
    }

    pub fn from_interfaces(interfaces: Vec<SimInterface>, gev_enumeration: Option<bool>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                interfaces,
                gev_enumeration,
                available: true,
                sink: None,
                force_ip_runs: 0,
            })),
        }
    }

    /// Plug in an interface. Only the interface arrival is announced, even
    /// when it comes with devices attached.
    pub fn add_interface(&self, iface: SimInterface) -> bool {
        let mut state = self.state.lock();
        if state.interfaces.iter().any(|i| i.id == iface.id) {
            return false;
        }
        let id = iface.id.clone();
        state.interfaces.push(iface);
        state.emit(TopologyEvent::InterfaceArrival { interface_id: id });
        true
    }

    /// Unplug an interface, announcing its devices' removal first
    pub fn remove_interface(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.interfaces.iter().position(|i| i.id == id) else {
            return false;
        };
        let iface = state.interfaces.remove(pos);
        for device in &iface.devices {
            state.emit(TopologyEvent::DeviceRemoval {
                interface_id: iface.id.clone(),
                serial: device.serial,
            });
        }
        state.emit(TopologyEvent::InterfaceRemoval { interface_id: iface.id });
        true
    }

    /// Unplug an interface announcing only the interface removal
    pub fn remove_interface_abruptly(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.interfaces.iter().position(|i| i.id == id) else {
            return false;
        };
        let iface = state.interfaces.remove(pos);
        state.emit(TopologyEvent::InterfaceRemoval { interface_id: iface.id });
        true
    }

    /// Attach a device to an existing interface
    pub fn attach_device(&self, interface_id: &str, device: SimDevice) -> bool {
        let mut state = self.state.lock();
        if state.owner_of(device.serial).is_some() {
            return false;
        }
        let Some(iface) = state.interfaces.iter_mut().find(|i| i.id == interface_id) else {
            return false;
        };
        let serial = device.serial;
        iface.devices.push(device);
        state.emit(TopologyEvent::DeviceArrival {
            interface_id: interface_id.to_string(),
            serial,
        });
        true
    }

    pub fn detach_device(&self, serial: u64) -> bool {
        let mut state = self.state.lock();
        let Some(owner) = state.owner_of(serial) else {
            return false;
        };
        let iface = &mut state.interfaces[owner];
        iface.devices.retain(|d| d.serial != serial);
        let interface_id = iface.id.clone();
        state.emit(TopologyEvent::DeviceRemoval { interface_id, serial });
        true
    }

    /// Make enumeration fail (`false`) or succeed again
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// `None` removes the `EnumerateGEVInterfaces` node
    pub fn set_gev_enumeration(&self, enabled: Option<bool>) {
        self.state.lock().gev_enumeration = enabled;
    }

    pub fn interface_ids(&self) -> Vec<String> {
        self.state.lock().interfaces.iter().map(|i| i.id.clone()).collect()
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().interfaces.iter().map(|i| i.devices.len()).sum()
    }

    pub fn device(&self, serial: u64) -> Option<SimDevice> {
        self.state.lock().device(serial).cloned()
    }

    /// How many times `AutoForceIP` has run on any interface
    pub fn force_ip_runs(&self) -> usize {
        self.state.lock().force_ip_runs
    }

    fn interface_nodes(&self, iface: &SimInterface) -> StaticNodeMap {
        let mut nodes = StaticNodeMap::new()
            .with_string(names::INTERFACE_ID, iface.id.clone())
            .with_string(names::INTERFACE_TYPE, iface.kind.clone());
        if let Some(name) = &iface.display_name {
            nodes = nodes.with_string(names::INTERFACE_DISPLAY_NAME, name.clone());
        }
        if iface.auto_force_ip {
            let state: Weak<Mutex<SimState>> = Arc::downgrade(&self.state);
            let id = iface.id.clone();
            nodes = nodes.with_command(names::AUTO_FORCE_IP, move || {
                let state = state
                    .upgrade()
                    .ok_or_else(|| "simulated transport dropped".to_string())?;
                let mut state = state.lock();
                state.force_ip(&id)
            });
        }
        nodes
    }
}

impl Transport for SimulatedTransport {
    fn name(&self) -> &str {
        "simulated"
    }

    fn system_nodes(&self) -> Arc<dyn NodeMap> {
        let nodes = match self.state.lock().gev_enumeration {
            Some(enabled) => StaticNodeMap::new().with_bool(names::ENUMERATE_GEV_INTERFACES, enabled),
            None => StaticNodeMap::new(),
        };
        Arc::new(nodes)
    }

    fn enumerate(&self) -> Result<Vec<TransportInterface>, TransportError> {
        let state = self.state.lock();
        if !state.available {
            return Err(TransportError::Unavailable("simulated transport is offline".to_string()));
        }
        Ok(state
            .interfaces
            .iter()
            .map(|iface| TransportInterface {
                nodes: Arc::new(self.interface_nodes(iface)),
                devices: iface
                    .devices
                    .iter()
                    .map(|d| Arc::new(d.tl_nodes()) as Arc<dyn NodeMap>)
                    .collect(),
            })
            .collect())
    }

    fn open_device(&self, serial: u64) -> Result<Arc<dyn NodeMap>, TransportError> {
        let state = self.state.lock();
        let device = state
            .device(serial)
            .ok_or(TransportError::DeviceNotFound(serial))?;
        if !device.reachable {
            return Err(TransportError::InvalidAddress {
                serial,
                reason: "current IP is not on the adapter subnet".to_string(),
            });
        }
        Ok(Arc::new(device.device_nodes()))
    }

    fn start(&self, sink: EventSink) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.sink.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        state.sink = Some(sink);
        info!(interfaces = state.interfaces.len(), "Simulated transport started");
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().sink = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Signal, SignalQueue};
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Signal>) -> Vec<TopologyEvent> {
        let mut out = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            if let Signal::Event { event, .. } = signal {
                out.push(event);
            }
        }
        out
    }

    #[test]
    fn test_interface_arrival_does_not_announce_devices() {
        let sim = SimulatedTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sim.start(EventSink::new(Arc::new(SignalQueue::new(tx)))).unwrap();

        sim.add_interface(SimInterface::gev("eth0").with_device(SimDevice::new(1)));
        assert_eq!(
            drain(&mut rx),
            vec![TopologyEvent::InterfaceArrival { interface_id: "eth0".to_string() }]
        );
        assert_eq!(sim.device_count(), 1);
    }

    #[test]
    fn test_remove_interface_orders_events() {
        let sim = SimulatedTransport::new();
        sim.add_interface(
            SimInterface::gev("eth0")
                .with_device(SimDevice::new(1))
                .with_device(SimDevice::new(2)),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        sim.start(EventSink::new(Arc::new(SignalQueue::new(tx)))).unwrap();

        assert!(sim.remove_interface("eth0"));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events[0].is_device_event());
        assert!(events[1].is_device_event());
        assert_eq!(
            events[2],
            TopologyEvent::InterfaceRemoval { interface_id: "eth0".to_string() }
        );
        assert!(!sim.remove_interface("eth0"));
    }

    #[test]
    fn test_attach_rejects_duplicate_serial() {
        let sim = SimulatedTransport::new();
        sim.add_interface(SimInterface::gev("eth0"));
        sim.add_interface(SimInterface::gev("eth1"));
        assert!(sim.attach_device("eth0", SimDevice::new(9)));
        assert!(!sim.attach_device("eth1", SimDevice::new(9)));
        assert!(!sim.attach_device("eth9", SimDevice::new(10)));
        assert!(sim.detach_device(9));
        assert!(!sim.detach_device(9));
    }

    #[test]
    fn test_offline_enumeration_fails() {
        let sim = SimulatedTransport::new();
        sim.set_available(false);
        assert!(matches!(sim.enumerate(), Err(TransportError::Unavailable(_))));
    }

    #[test]
    fn test_force_ip_moves_device_onto_subnet() {
        let sim = SimulatedTransport::new();
        sim.add_interface(
            SimInterface::gev("eth0")
                .with_subnet(Ipv4Addr::new(192, 168, 10, 1), Ipv4Addr::new(255, 255, 255, 0))
                .with_device(
                    SimDevice::new(5)
                        .with_address(
                            Ipv4Addr::new(169, 254, 3, 3),
                            Ipv4Addr::new(255, 255, 0, 0),
                            Ipv4Addr::UNSPECIFIED,
                        )
                        .unreachable(),
                ),
        );
        assert!(matches!(
            sim.open_device(5),
            Err(TransportError::InvalidAddress { serial: 5, .. })
        ));

        let found = sim.enumerate().unwrap();
        found[0].nodes.execute(names::AUTO_FORCE_IP).unwrap();

        let device = sim.device(5).unwrap();
        assert_eq!(device.ip, Some(Ipv4Addr::new(192, 168, 10, 100)));
        assert_eq!(sim.force_ip_runs(), 1);
        let nodes = sim.open_device(5).unwrap();
        assert_eq!(
            nodes.read_integer(names::GEV_PERSISTENT_IP_ADDRESS).unwrap(),
            i64::from(u32::from(Ipv4Addr::new(192, 168, 10, 100)))
        );
    }

    #[test]
    fn test_usb3_interface_has_no_force_ip() {
        let sim = SimulatedTransport::new();
        sim.add_interface(SimInterface::usb3("usb0"));
        let found = sim.enumerate().unwrap();
        assert!(found[0].nodes.node(names::AUTO_FORCE_IP).is_none());
    }
}
