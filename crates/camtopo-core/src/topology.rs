//! Immutable point-in-time views of the interface/device tree
//!
//! A [`TopologySnapshot`] is built once by [`SnapshotBuilder`] and never
//! mutated afterwards, so readers can share it freely. The builder upholds
//! the snapshot invariant: every device in the flattened list is attached to
//! exactly one interface.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::device::DeviceIdentity;
use crate::error::TopologyError;
use crate::interface::{InterfaceIdentity, InterfaceType};
use crate::node::NodeMap;

/// An interface as captured by one snapshot
#[derive(Debug)]
pub struct InterfaceRecord {
    pub identity: InterfaceIdentity,
    pub kind: InterfaceType,
    pub display_name: Option<String>,
    /// Devices attached at capture time, in transport order
    pub devices: Vec<DeviceIdentity>,
    /// Transport-layer node map of the interface
    pub nodes: Arc<dyn NodeMap>,
}

impl InterfaceRecord {
    /// Display name, or the placeholder shown when it could not be read
    pub fn display_label(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or("Unknown Interface (Display name not readable)")
    }
}

/// A device as captured by one snapshot
#[derive(Debug)]
pub struct DeviceRecord {
    pub identity: DeviceIdentity,
    /// ID of the interface the device is attached to
    pub interface_id: String,
    /// Transport-layer node map of the device
    pub nodes: Arc<dyn NodeMap>,
}

/// Something that could not be enumerated, kept alongside the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumerationIssue {
    /// An interface whose identity could not be read; it is left out
    Interface { position: usize, reason: String },
    /// A device whose identity could not be read; it is left out
    Device {
        interface: String,
        position: usize,
        reason: String,
    },
    /// A device reported on more than one interface; only the first is kept
    DuplicateDevice {
        serial: u64,
        kept_on: String,
        dropped_from: String,
    },
    /// The same interface ID reported twice; only the first is kept
    DuplicateInterface { id: String },
}

impl fmt::Display for EnumerationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interface { position, reason } => {
                write!(f, "interface at position {} skipped: {}", position, reason)
            }
            Self::Device {
                interface,
                position,
                reason,
            } => write!(
                f,
                "device {} on interface {} skipped: {}",
                position, interface, reason
            ),
            Self::DuplicateDevice {
                serial,
                kept_on,
                dropped_from,
            } => write!(
                f,
                "device {} reported on {} and {}, kept on {}",
                serial, kept_on, dropped_from, kept_on
            ),
            Self::DuplicateInterface { id } => write!(f, "interface {} reported twice", id),
        }
    }
}

/// Point-in-time view of the whole topology
#[derive(Debug)]
pub struct TopologySnapshot {
    generation: u64,
    taken_at: DateTime<Utc>,
    interfaces: Vec<Arc<InterfaceRecord>>,
    devices: Vec<Arc<DeviceRecord>>,
    issues: Vec<EnumerationIssue>,
}

impl TopologySnapshot {
    /// Monotonic number of the refresh that produced this snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn interfaces(&self) -> &[Arc<InterfaceRecord>] {
        &self.interfaces
    }

    /// Devices flattened across all interfaces, grouped in interface order
    pub fn devices(&self) -> &[Arc<DeviceRecord>] {
        &self.devices
    }

    pub fn issues(&self) -> &[EnumerationIssue] {
        &self.issues
    }

    /// Bounds-checked positional access
    pub fn interface(&self, index: usize) -> Result<&Arc<InterfaceRecord>, TopologyError> {
        self.interfaces.get(index).ok_or(TopologyError::IndexOutOfRange {
            index,
            len: self.interfaces.len(),
        })
    }

    pub fn interface_by_id(&self, id: &str) -> Option<&Arc<InterfaceRecord>> {
        self.interfaces.iter().find(|i| i.identity.id == id)
    }

    pub fn device_by_serial(&self, serial: u64) -> Option<&Arc<DeviceRecord>> {
        self.devices.iter().find(|d| d.identity.serial == serial)
    }

    /// Devices attached to the given interface
    pub fn devices_on<'a>(&'a self, interface_id: &'a str) -> impl Iterator<Item = &'a Arc<DeviceRecord>> + 'a {
        self.devices
            .iter()
            .filter(move |d| d.interface_id == interface_id)
    }

    pub fn serials(&self) -> BTreeSet<u64> {
        self.devices.iter().map(|d| d.identity.serial).collect()
    }

    pub fn interface_ids(&self) -> BTreeSet<String> {
        self.interfaces.iter().map(|i| i.identity.id.clone()).collect()
    }

    /// Compare by identity sets and attachments, ignoring ordinals and generation
    pub fn same_topology(&self, other: &TopologySnapshot) -> bool {
        let attachments = |s: &TopologySnapshot| -> BTreeSet<(String, u64)> {
            s.devices
                .iter()
                .map(|d| (d.interface_id.clone(), d.identity.serial))
                .collect()
        };
        self.interface_ids() == other.interface_ids() && attachments(self) == attachments(other)
    }

    /// Check the attachment invariant, describing the first violation found
    pub fn verify(&self) -> Result<(), String> {
        let mut owners: HashMap<u64, &str> = HashMap::new();
        for iface in &self.interfaces {
            for device in &iface.devices {
                if let Some(prev) = owners.insert(device.serial, &iface.identity.id) {
                    return Err(format!(
                        "device {} attached to both {} and {}",
                        device.serial, prev, iface.identity.id
                    ));
                }
            }
        }
        if owners.len() != self.devices.len() {
            return Err(format!(
                "{} attached devices but {} in flattened list",
                owners.len(),
                self.devices.len()
            ));
        }
        for device in &self.devices {
            match owners.get(&device.identity.serial) {
                Some(owner) if *owner == device.interface_id => {}
                Some(owner) => {
                    return Err(format!(
                        "device {} listed under {} but attached to {}",
                        device.identity.serial, device.interface_id, owner
                    ))
                }
                None => return Err(format!("device {} is orphaned", device.identity.serial)),
            }
        }
        Ok(())
    }
}

/// Incremental construction of a [`TopologySnapshot`]
pub struct SnapshotBuilder {
    generation: u64,
    interfaces: Vec<InterfaceRecord>,
    devices: Vec<DeviceRecord>,
    issues: Vec<EnumerationIssue>,
    owners: HashMap<u64, usize>,
}

impl SnapshotBuilder {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            interfaces: Vec::new(),
            devices: Vec::new(),
            issues: Vec::new(),
            owners: HashMap::new(),
        }
    }

    /// Append an interface, returning its position, or `None` if the ID is a duplicate
    pub fn add_interface(
        &mut self,
        id: impl Into<String>,
        kind: InterfaceType,
        display_name: Option<String>,
        nodes: Arc<dyn NodeMap>,
    ) -> Option<usize> {
        let id = id.into();
        if self.interfaces.iter().any(|i| i.identity.id == id) {
            self.issues.push(EnumerationIssue::DuplicateInterface { id });
            return None;
        }

        let index = self.interfaces.len();
        self.interfaces.push(InterfaceRecord {
            identity: InterfaceIdentity { id, index },
            kind,
            display_name,
            devices: Vec::new(),
            nodes,
        });
        Some(index)
    }

    /// Attach a device to the interface at `position`
    ///
    /// Returns `false` when the serial is already attached elsewhere.
    ///
    /// # Panics
    /// Panics if `position` was not returned by [`add_interface`](Self::add_interface).
    pub fn add_device(
        &mut self,
        position: usize,
        identity: DeviceIdentity,
        nodes: Arc<dyn NodeMap>,
    ) -> bool {
        let interface_id = self.interfaces[position].identity.id.clone();
        if let Some(&owner) = self.owners.get(&identity.serial) {
            self.issues.push(EnumerationIssue::DuplicateDevice {
                serial: identity.serial,
                kept_on: self.interfaces[owner].identity.id.clone(),
                dropped_from: interface_id,
            });
            return false;
        }

        self.owners.insert(identity.serial, position);
        self.interfaces[position].devices.push(identity.clone());
        self.devices.push(DeviceRecord {
            identity,
            interface_id,
            nodes,
        });
        true
    }

    pub fn report(&mut self, issue: EnumerationIssue) {
        self.issues.push(issue);
    }

    pub fn build(self) -> TopologySnapshot {
        let interfaces: Vec<Arc<InterfaceRecord>> =
            self.interfaces.into_iter().map(Arc::new).collect();

        // Flatten in interface order so the device list groups by interface.
        let mut devices: Vec<Arc<DeviceRecord>> = Vec::with_capacity(self.devices.len());
        let mut pending: Vec<Option<DeviceRecord>> = self.devices.into_iter().map(Some).collect();
        for iface in &interfaces {
            for slot in pending.iter_mut() {
                if slot
                    .as_ref()
                    .is_some_and(|d| d.interface_id == iface.identity.id)
                {
                    if let Some(device) = slot.take() {
                        devices.push(Arc::new(device));
                    }
                }
            }
        }

        debug!(
            generation = self.generation,
            interfaces = interfaces.len(),
            devices = devices.len(),
            issues = self.issues.len(),
            "Snapshot built"
        );
        TopologySnapshot {
            generation: self.generation,
            taken_at: Utc::now(),
            interfaces,
            devices,
            issues: self.issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StaticNodeMap;

    fn nodes() -> Arc<dyn NodeMap> {
        Arc::new(StaticNodeMap::new())
    }

    fn two_interface_snapshot(generation: u64) -> TopologySnapshot {
        let mut builder = SnapshotBuilder::new(generation);
        let a = builder
            .add_interface("eth0", InterfaceType::Gev, Some("Intel I210".into()), nodes())
            .unwrap();
        let b = builder
            .add_interface("usb0", InterfaceType::Usb3, None, nodes())
            .unwrap();
        builder.add_device(b, DeviceIdentity::new(3, "cam3"), nodes());
        builder.add_device(a, DeviceIdentity::new(1, "cam1"), nodes());
        builder.add_device(a, DeviceIdentity::new(2, "cam2"), nodes());
        builder.build()
    }

    #[test]
    fn test_devices_grouped_by_interface() {
        let snap = two_interface_snapshot(1);
        let serials: Vec<u64> = snap.devices().iter().map(|d| d.identity.serial).collect();
        assert_eq!(serials, vec![1, 2, 3]);
        assert_eq!(snap.devices_on("usb0").count(), 1);
        assert!(snap.verify().is_ok());
    }

    #[test]
    fn test_interface_ordinals_follow_position() {
        let snap = two_interface_snapshot(1);
        assert_eq!(snap.interface(0).unwrap().identity.id, "eth0");
        assert_eq!(snap.interface(1).unwrap().identity.index, 1);
        assert_eq!(
            snap.interface(2).unwrap_err(),
            TopologyError::IndexOutOfRange { index: 2, len: 2 }
        );
    }

    #[test]
    fn test_duplicate_device_kept_once() {
        let mut builder = SnapshotBuilder::new(1);
        let a = builder.add_interface("eth0", InterfaceType::Gev, None, nodes()).unwrap();
        let b = builder.add_interface("eth1", InterfaceType::Gev, None, nodes()).unwrap();
        assert!(builder.add_device(a, DeviceIdentity::new(7, "cam"), nodes()));
        assert!(!builder.add_device(b, DeviceIdentity::new(7, "cam"), nodes()));
        let snap = builder.build();

        assert_eq!(snap.devices().len(), 1);
        assert!(snap.interface_by_id("eth1").unwrap().devices.is_empty());
        assert_eq!(
            snap.issues()[0],
            EnumerationIssue::DuplicateDevice {
                serial: 7,
                kept_on: "eth0".to_string(),
                dropped_from: "eth1".to_string(),
            }
        );
        assert!(snap.verify().is_ok());
    }

    #[test]
    fn test_duplicate_interface_rejected() {
        let mut builder = SnapshotBuilder::new(1);
        assert!(builder.add_interface("eth0", InterfaceType::Gev, None, nodes()).is_some());
        assert!(builder.add_interface("eth0", InterfaceType::Gev, None, nodes()).is_none());
        let snap = builder.build();
        assert_eq!(snap.interfaces().len(), 1);
        assert_eq!(snap.issues().len(), 1);
    }

    #[test]
    fn test_same_topology_ignores_generation() {
        let first = two_interface_snapshot(1);
        let second = two_interface_snapshot(2);
        assert!(first.same_topology(&second));
        assert_eq!(first.serials(), second.serials());

        let mut builder = SnapshotBuilder::new(3);
        let a = builder.add_interface("eth0", InterfaceType::Gev, None, nodes()).unwrap();
        builder.add_interface("usb0", InterfaceType::Usb3, None, nodes());
        builder.add_device(a, DeviceIdentity::new(1, "cam1"), nodes());
        builder.add_device(a, DeviceIdentity::new(2, "cam2"), nodes());
        builder.add_device(a, DeviceIdentity::new(3, "cam3"), nodes());
        assert!(!first.same_topology(&builder.build()));
    }

    #[test]
    fn test_display_label_fallback() {
        let snap = two_interface_snapshot(1);
        assert_eq!(snap.interface(0).unwrap().display_label(), "Intel I210");
        assert_eq!(
            snap.interface(1).unwrap().display_label(),
            "Unknown Interface (Display name not readable)"
        );
    }
}
