//! camtopo Core - Data model for camera transport topologies
//!
//! This crate provides the foundational types shared by the camtopo crates:
//! - Device and interface identities
//! - Immutable topology snapshots with their consistency invariant
//! - The node accessor seam used to read device and interface properties
//! - GigE address formatting and parsing
//! - The error taxonomy for topology operations

pub mod address;
pub mod device;
pub mod error;
pub mod interface;
pub mod node;
pub mod topology;

pub use address::{format_ipv4, format_mac, normalize_mac, parse_ipv4, AddressParseError, MacAddress};
pub use device::{parse_serial, DeviceIdentity, DeviceInfo};
pub use error::TopologyError;
pub use interface::{InterfaceIdentity, InterfaceType};
pub use node::{names, Node, NodeAccess, NodeError, NodeMap, NodeValue, StaticNodeMap};
pub use topology::{
    DeviceRecord, EnumerationIssue, InterfaceRecord, SnapshotBuilder, TopologySnapshot,
};
