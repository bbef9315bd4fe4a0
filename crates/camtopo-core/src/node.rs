//! Property node access for devices, interfaces, and the system
//!
//! Transports expose their property trees through [`NodeMap`]. Nodes carry
//! a typed value plus availability/readability/writability flags, and must
//! be checked before use. [`StaticNodeMap`] is an in-memory implementation
//! used by the simulated transport and host adapter listing.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Well-known node names
pub mod names {
    pub const INTERFACE_ID: &str = "InterfaceID";
    pub const INTERFACE_TYPE: &str = "InterfaceType";
    pub const INTERFACE_DISPLAY_NAME: &str = "InterfaceDisplayName";
    pub const DEVICE_SERIAL_NUMBER: &str = "DeviceSerialNumber";
    pub const DEVICE_MODEL_NAME: &str = "DeviceModelName";
    pub const DEVICE_VENDOR_NAME: &str = "DeviceVendorName";
    pub const GEV_DEVICE_IP_ADDRESS: &str = "GevDeviceIPAddress";
    pub const GEV_DEVICE_SUBNET_MASK: &str = "GevDeviceSubnetMask";
    pub const GEV_DEVICE_GATEWAY: &str = "GevDeviceGateway";
    pub const GEV_DEVICE_MAC_ADDRESS: &str = "GevDeviceMACAddress";
    pub const GEV_PERSISTENT_IP_ADDRESS: &str = "GevPersistentIPAddress";
    pub const GEV_PERSISTENT_SUBNET_MASK: &str = "GevPersistentSubnetMask";
    pub const GEV_PERSISTENT_DEFAULT_GATEWAY: &str = "GevPersistentDefaultGateway";
    pub const ENUMERATE_GEV_INTERFACES: &str = "EnumerateGEVInterfaces";
    pub const AUTO_FORCE_IP: &str = "AutoForceIP";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Node {0} is not available")]
    NotAvailable(String),
    #[error("Node {0} is not readable")]
    NotReadable(String),
    #[error("Node {0} is not writable")]
    NotWritable(String),
    #[error("Node {name} holds {actual}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Command {name} failed: {reason}")]
    Execution { name: String, reason: String },
}

/// Typed node value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    /// Executable command with no readable value
    Command,
}

impl NodeValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Command => "command",
        }
    }
}

/// Access flags for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAccess {
    pub available: bool,
    pub readable: bool,
    pub writable: bool,
}

impl NodeAccess {
    pub const READ_ONLY: Self = Self { available: true, readable: true, writable: false };
    pub const READ_WRITE: Self = Self { available: true, readable: true, writable: true };
    pub const WRITE_ONLY: Self = Self { available: true, readable: false, writable: true };
    pub const UNAVAILABLE: Self = Self { available: false, readable: false, writable: false };
}

/// A single property node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    name: String,
    value: NodeValue,
    access: NodeAccess,
}

impl Node {
    pub fn new(name: impl Into<String>, value: NodeValue, access: NodeAccess) -> Self {
        Self {
            name: name.into(),
            value,
            access,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_available(&self) -> bool {
        self.access.available
    }

    pub fn is_readable(&self) -> bool {
        self.access.available && self.access.readable
    }

    pub fn is_writable(&self) -> bool {
        self.access.available && self.access.writable
    }

    fn readable_value(&self) -> Result<&NodeValue, NodeError> {
        if !self.is_available() {
            return Err(NodeError::NotAvailable(self.name.clone()));
        }
        if !self.is_readable() {
            return Err(NodeError::NotReadable(self.name.clone()));
        }
        Ok(&self.value)
    }

    fn mismatch(&self, expected: &'static str) -> NodeError {
        NodeError::TypeMismatch {
            name: self.name.clone(),
            expected,
            actual: self.value.kind(),
        }
    }

    pub fn as_str(&self) -> Result<&str, NodeError> {
        match self.readable_value()? {
            NodeValue::String(s) => Ok(s),
            _ => Err(self.mismatch("string")),
        }
    }

    pub fn as_integer(&self) -> Result<i64, NodeError> {
        match self.readable_value()? {
            NodeValue::Integer(v) => Ok(*v),
            _ => Err(self.mismatch("integer")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, NodeError> {
        match self.readable_value()? {
            NodeValue::Boolean(v) => Ok(*v),
            _ => Err(self.mismatch("boolean")),
        }
    }
}

/// Key-value accessor over a property tree
///
/// The typed `read_*` helpers fold the availability and readability checks
/// into the lookup so callers cannot skip them.
pub trait NodeMap: Send + Sync {
    /// Look up a node by name
    fn node(&self, name: &str) -> Option<Node>;

    /// Execute a command node
    fn execute(&self, name: &str) -> Result<(), NodeError>;

    fn read_string(&self, name: &str) -> Result<String, NodeError> {
        let node = self
            .node(name)
            .ok_or_else(|| NodeError::NotAvailable(name.to_string()))?;
        node.as_str().map(str::to_string)
    }

    fn read_integer(&self, name: &str) -> Result<i64, NodeError> {
        let node = self
            .node(name)
            .ok_or_else(|| NodeError::NotAvailable(name.to_string()))?;
        node.as_integer()
    }

    fn read_bool(&self, name: &str) -> Result<bool, NodeError> {
        let node = self
            .node(name)
            .ok_or_else(|| NodeError::NotAvailable(name.to_string()))?;
        node.as_bool()
    }
}

impl fmt::Debug for dyn NodeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodeMap")
    }
}

type CommandHandler = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// In-memory node map
#[derive(Default)]
pub struct StaticNodeMap {
    nodes: RwLock<BTreeMap<String, Node>>,
    commands: RwLock<BTreeMap<String, CommandHandler>>,
}

impl StaticNodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, NodeValue::String(value.into()), NodeAccess::READ_ONLY);
        self
    }

    pub fn with_integer(self, name: &str, value: i64) -> Self {
        self.set(name, NodeValue::Integer(value), NodeAccess::READ_ONLY);
        self
    }

    pub fn with_bool(self, name: &str, value: bool) -> Self {
        self.set(name, NodeValue::Boolean(value), NodeAccess::READ_WRITE);
        self
    }

    /// Add a writable command node backed by `handler`
    pub fn with_command<F>(self, name: &str, handler: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.set(name, NodeValue::Command, NodeAccess::WRITE_ONLY);
        self.commands.write().insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Insert or replace a node
    pub fn set(&self, name: &str, value: NodeValue, access: NodeAccess) {
        self.nodes
            .write()
            .insert(name.to_string(), Node::new(name, value, access));
    }

    /// Change the access flags of an existing node
    pub fn set_access(&self, name: &str, access: NodeAccess) {
        if let Some(node) = self.nodes.write().get_mut(name) {
            node.access = access;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeMap for StaticNodeMap {
    fn node(&self, name: &str) -> Option<Node> {
        self.nodes.read().get(name).cloned()
    }

    fn execute(&self, name: &str) -> Result<(), NodeError> {
        let node = self
            .node(name)
            .ok_or_else(|| NodeError::NotAvailable(name.to_string()))?;
        if !node.is_available() {
            return Err(NodeError::NotAvailable(name.to_string()));
        }
        if !node.is_writable() {
            return Err(NodeError::NotWritable(name.to_string()));
        }
        if node.value != NodeValue::Command {
            return Err(node.mismatch("command"));
        }
        // Clone the handler out so it may touch this map.
        let handler = self.commands.read().get(name).cloned();
        match handler {
            Some(handler) => handler().map_err(|reason| NodeError::Execution {
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_typed_reads() {
        let map = StaticNodeMap::new()
            .with_string(names::DEVICE_SERIAL_NUMBER, "21290000")
            .with_integer(names::GEV_DEVICE_IP_ADDRESS, 0xC0A8_0101)
            .with_bool(names::ENUMERATE_GEV_INTERFACES, true);

        assert_eq!(map.read_string(names::DEVICE_SERIAL_NUMBER).unwrap(), "21290000");
        assert_eq!(map.read_integer(names::GEV_DEVICE_IP_ADDRESS).unwrap(), 0xC0A8_0101);
        assert!(map.read_bool(names::ENUMERATE_GEV_INTERFACES).unwrap());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_missing_and_unreadable_nodes() {
        let map = StaticNodeMap::new().with_string(names::DEVICE_MODEL_NAME, "Blackfly S");
        assert_eq!(
            map.read_string(names::DEVICE_VENDOR_NAME),
            Err(NodeError::NotAvailable(names::DEVICE_VENDOR_NAME.to_string()))
        );

        map.set_access(names::DEVICE_MODEL_NAME, NodeAccess::WRITE_ONLY);
        assert_eq!(
            map.read_string(names::DEVICE_MODEL_NAME),
            Err(NodeError::NotReadable(names::DEVICE_MODEL_NAME.to_string()))
        );
    }

    #[test]
    fn test_type_mismatch() {
        let map = StaticNodeMap::new().with_string(names::GEV_DEVICE_IP_ADDRESS, "192.168.1.1");
        let err = map.read_integer(names::GEV_DEVICE_IP_ADDRESS).unwrap_err();
        assert!(matches!(err, NodeError::TypeMismatch { expected: "integer", actual: "string", .. }));
    }

    #[test]
    fn test_execute_command() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let map = StaticNodeMap::new().with_command(names::AUTO_FORCE_IP, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        map.execute(names::AUTO_FORCE_IP).unwrap();
        map.execute(names::AUTO_FORCE_IP).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        map.set_access(names::AUTO_FORCE_IP, NodeAccess::READ_ONLY);
        assert_eq!(
            map.execute(names::AUTO_FORCE_IP),
            Err(NodeError::NotWritable(names::AUTO_FORCE_IP.to_string()))
        );
    }

    #[test]
    fn test_failed_command_reports_reason() {
        let map = StaticNodeMap::new().with_command(names::AUTO_FORCE_IP, || Err("no link".to_string()));
        assert_eq!(
            map.execute(names::AUTO_FORCE_IP),
            Err(NodeError::Execution {
                name: names::AUTO_FORCE_IP.to_string(),
                reason: "no link".to_string(),
            })
        );
    }
}
