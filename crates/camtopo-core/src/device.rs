//! Device types for cameras attached to transport interfaces

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::{format_ipv4, MacAddress};
use crate::node::{names, NodeError, NodeMap};

/// Session-stable identity of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Serial number reported by the device
    pub serial: u64,
    /// Vendor and model, for display only
    pub display: String,
}

impl DeviceIdentity {
    pub fn new(serial: u64, display: impl Into<String>) -> Self {
        Self {
            serial,
            display: display.into(),
        }
    }

    /// Read identity from a transport-layer device node map
    ///
    /// The serial is required; vendor and model are best-effort.
    pub fn from_nodes(nodes: &dyn NodeMap) -> Result<Self, NodeError> {
        let raw = nodes.read_string(names::DEVICE_SERIAL_NUMBER)?;
        let serial = parse_serial(&raw).ok_or_else(|| NodeError::TypeMismatch {
            name: names::DEVICE_SERIAL_NUMBER.to_string(),
            expected: "decimal serial",
            actual: "string",
        })?;

        let vendor = nodes.read_string(names::DEVICE_VENDOR_NAME).ok();
        let model = nodes.read_string(names::DEVICE_MODEL_NAME).ok();
        let display = match (vendor, model) {
            (Some(v), Some(m)) => format!("{} {}", v, m),
            (Some(v), None) => v,
            (None, Some(m)) => m,
            (None, None) => format!("Device {}", serial),
        };

        Ok(Self { serial, display })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.serial, self.display)
    }
}

/// Parse a serial number as transports report it
pub fn parse_serial(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

/// Descriptive information about a device
///
/// Every field is optional: a node that is missing or unreadable leaves its
/// field empty instead of failing the whole read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: Option<String>,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub ip_address: Option<u32>,
    pub subnet_mask: Option<u32>,
    pub gateway: Option<u32>,
    pub mac: Option<MacAddress>,
    /// Persistent settings, only present when the device could be opened
    pub persistent_ip_address: Option<u32>,
    pub persistent_subnet_mask: Option<u32>,
    pub persistent_gateway: Option<u32>,
}

impl DeviceInfo {
    /// Read the transport-layer fields
    pub fn from_tl_nodes(nodes: &dyn NodeMap) -> Self {
        Self {
            serial: nodes.read_string(names::DEVICE_SERIAL_NUMBER).ok(),
            model: nodes.read_string(names::DEVICE_MODEL_NAME).ok(),
            vendor: nodes.read_string(names::DEVICE_VENDOR_NAME).ok(),
            ip_address: read_u32(nodes, names::GEV_DEVICE_IP_ADDRESS),
            subnet_mask: read_u32(nodes, names::GEV_DEVICE_SUBNET_MASK),
            gateway: read_u32(nodes, names::GEV_DEVICE_GATEWAY),
            mac: nodes
                .read_integer(names::GEV_DEVICE_MAC_ADDRESS)
                .ok()
                .map(|v| MacAddress::from_u64(v as u64)),
            ..Default::default()
        }
    }

    /// Fill the persistent fields from an opened device's node map
    pub fn with_device_nodes(mut self, nodes: &dyn NodeMap) -> Self {
        self.persistent_ip_address = read_u32(nodes, names::GEV_PERSISTENT_IP_ADDRESS);
        self.persistent_subnet_mask = read_u32(nodes, names::GEV_PERSISTENT_SUBNET_MASK);
        self.persistent_gateway = read_u32(nodes, names::GEV_PERSISTENT_DEFAULT_GATEWAY);
        self
    }

    /// Labelled lines in display order, skipping absent fields
    pub fn lines(&self) -> Vec<(&'static str, String)> {
        let mut lines = Vec::new();
        if let Some(serial) = &self.serial {
            lines.push((names::DEVICE_SERIAL_NUMBER, serial.clone()));
        }
        if let Some(model) = &self.model {
            lines.push((names::DEVICE_MODEL_NAME, model.clone()));
        }
        if let Some(vendor) = &self.vendor {
            lines.push((names::DEVICE_VENDOR_NAME, vendor.clone()));
        }
        let addresses = [
            (names::GEV_DEVICE_IP_ADDRESS, self.ip_address),
            (names::GEV_DEVICE_SUBNET_MASK, self.subnet_mask),
            (names::GEV_DEVICE_GATEWAY, self.gateway),
        ];
        for (label, value) in addresses {
            if let Some(v) = value {
                lines.push((label, format_ipv4(v)));
            }
        }
        if let Some(mac) = self.mac {
            lines.push((names::GEV_DEVICE_MAC_ADDRESS, mac.to_string()));
        }
        let persistent = [
            (names::GEV_PERSISTENT_IP_ADDRESS, self.persistent_ip_address),
            (names::GEV_PERSISTENT_SUBNET_MASK, self.persistent_subnet_mask),
            (names::GEV_PERSISTENT_DEFAULT_GATEWAY, self.persistent_gateway),
        ];
        for (label, value) in persistent {
            if let Some(v) = value {
                lines.push((label, format_ipv4(v)));
            }
        }
        lines
    }
}

fn read_u32(nodes: &dyn NodeMap, name: &str) -> Option<u32> {
    nodes.read_integer(name).ok().map(|v| v as u32)
}
